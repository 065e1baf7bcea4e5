// Canned Tangier responses shared by the unit tests

pub const SCHEDULE_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<tangier version="1.0" method="schedule.response">
  <schedule>
    <site_id>100</site_id>
    <dates>
      <date shiftdate="05/01/2017">
        <shifts>
          <shift>
            <siteid>100</siteid>
            <location>ER</location>
            <empid>1111</empid>
            <providername>Smith, Ann</providername>
            <providerprimarykey>1</providerprimarykey>
            <actualstarttime>07:00 AM</actualstarttime>
            <reportedminutes>480</reportedminutes>
          </shift>
          <shift>
            <siteid>100</siteid>
            <location>ER</location>
            <empid></empid>
            <providername>open</providername>
            <providerprimarykey></providerprimarykey>
            <actualstarttime>03:00 PM</actualstarttime>
            <reportedminutes>0</reportedminutes>
          </shift>
        </shifts>
      </date>
      <date shiftdate="05/02/2017">
        <shifts>
          <shift>
            <siteid>100</siteid>
            <location>ICU</location>
            <empid>2222</empid>
            <providername>Jones, Bo</providername>
            <providerprimarykey>2</providerprimarykey>
            <actualstarttime>5/2/2017 11:00 PM</actualstarttime>
            <reportedminutes>600.0</reportedminutes>
          </shift>
        </shifts>
      </date>
    </dates>
  </schedule>
</tangier>"#;

pub const EMPTY_SCHEDULE_RESPONSE: &str =
    r#"<tangier version="1.0" method="schedule.response"><schedule><dates/></schedule></tangier>"#;

pub const PROVIDER_RESPONSE: &str = r#"<tangier version="1.0" method="provider.response">
  <providers>
    <provider action="info">
      <provider_primary_key>1</provider_primary_key>
      <emp_id>1111</emp_id>
      <first_name>Ann</first_name>
      <last_name>Smith</last_name>
      <npi>1234567890</npi>
      <processed>true</processed>
      <comment>ok</comment>
      <street>1 Main St</street>
      <city>Springfield</city>
      <state>IL</state>
      <zip>62701</zip>
    </provider>
    <provider action="info">
      <provider_primary_key>2</provider_primary_key>
      <emp_id>2222</emp_id>
      <first_name>Bo</first_name>
      <last_name>Jones</last_name>
      <npi>2345678901</npi>
      <processed>true</processed>
      <comment>ok</comment>
      <street>2 Main St</street>
      <city>Springfield</city>
      <state>IL</state>
      <zip>62701</zip>
    </provider>
  </providers>
</tangier>"#;

pub const LOCATION_RESPONSE: &str = r#"<tangier version="1.0" method="location.response">
  <locations>
    <location action="info">
      <site_id>100</site_id>
      <name>General Hospital</name>
      <short_name>GH</short_name>
      <is_scheduled>true</is_scheduled>
    </location>
    <location action="info">
      <site_id>200</site_id>
      <name>Lakeside Clinic</name>
      <short_name>LC</short_name>
      <is_scheduled>false</is_scheduled>
    </location>
  </locations>
</tangier>"#;

pub const LOCATION_ERROR_RESPONSE: &str = r#"<tangier version="1.0" method="location.response">
  <locations>
    <location action="add">
      <site_id>100</site_id>
      <comment>Error: site_id already exists</comment>
    </location>
  </locations>
</tangier>"#;

pub const SITE_PROVIDERS_RESPONSE: &str = r#"<tangier version="1.0" method="provider.response">
  <providers>
    <provider action="info">
      <site_id>100</site_id>
      <provider_primary_key>1</provider_primary_key>
      <emp_id>1111</emp_id>
    </provider>
    <provider action="info">
      <site_id>100</site_id>
      <provider_primary_key>3</provider_primary_key>
      <emp_id>3333</emp_id>
    </provider>
  </providers>
</tangier>"#;
