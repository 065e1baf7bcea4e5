// Location service connection
use crate::settings::{Credentials, Service, Settings};
use crate::soap::{build_request, check_response, debug_xml, ApiError, HttpSoapTransport, SoapTransport};
use crate::xmlmanip::{inject_tags, ElementTag, Predicate, Record, Tags, XmlSchema};
use std::sync::Arc;
use tracing::{debug, info};

pub const LOCATION_TEMPLATE: &str = r#"<tangier version="1.0" method="location.request"></tangier>"#;
pub const MAINTAIN_LOCATIONS: &str = "MaintainLocations";
pub const ALL_SITE_IDS: &str = "ALL_SITE_IDS";

// Fields for adding or updating a location. `extra` properties follow the required ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationFields {
    pub site_id: String,
    pub name: String,
    pub short_name: String,
    pub extra: Tags,
}

impl LocationFields {
    pub fn new(site_id: &str, name: &str, short_name: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            name: name.to_string(),
            short_name: short_name.to_string(),
            extra: Tags::new(),
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.extra.push(key, value);
        self
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.site_id.is_empty() || self.name.is_empty() || self.short_name.is_empty() {
            return Err(ApiError::ApiCall(
                "site_id, name, and short_name are all required.".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct LocationConnection {
    transport: Arc<dyn SoapTransport>,
    base_xml: String,
    show_xml_request: bool,
    show_xml_response: bool,
}

impl LocationConnection {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let transport = HttpSoapTransport::from_settings(settings, Service::Location)?;
        Ok(Self::with_transport(Arc::new(transport), &settings.credentials(), None)?
            .with_debug(settings.debug, settings.debug))
    }

    pub fn with_transport(
        transport: Arc<dyn SoapTransport>,
        credentials: &Credentials,
        base_xml: Option<&str>,
    ) -> Result<Self, ApiError> {
        let base_xml = inject_tags(
            base_xml.unwrap_or(LOCATION_TEMPLATE),
            "",
            0,
            &Tags::new()
                .with("admin_user", &credentials.username)
                .with("admin_pwd", &credentials.password),
        )?;
        Ok(Self {
            transport,
            base_xml,
            show_xml_request: false,
            show_xml_response: false,
        })
    }

    pub fn with_debug(mut self, show_xml_request: bool, show_xml_response: bool) -> Self {
        self.show_xml_request = show_xml_request;
        self.show_xml_response = show_xml_response;
        self
    }

    pub fn base_xml(&self) -> &str {
        &self.base_xml
    }

    pub async fn maintain_locations(&self, xml_string: &str) -> Result<String, ApiError> {
        if xml_string.is_empty() {
            return Err(ApiError::ApiCall(
                "xml_string must be provided to maintain_locations".to_string(),
            ));
        }
        debug_xml("MaintainLocations request", xml_string, self.show_xml_request);
        let response = self.transport.call(MAINTAIN_LOCATIONS, xml_string).await?;
        debug_xml("MaintainLocations response", &response, self.show_xml_response);
        check_response(&response)?;
        Ok(response)
    }

    async fn send_locations(&self, tags: Tags) -> Result<String, ApiError> {
        let xml_string = build_request(&self.base_xml, "locations", &tags)?;
        self.maintain_locations(&xml_string).await
    }

    /// Info for the given sites, or every site when `site_ids` is empty.
    pub async fn get_locations_info(&self, site_ids: &[String]) -> Result<String, ApiError> {
        let all = [ALL_SITE_IDS.to_string()];
        let site_ids = if site_ids.is_empty() { &all[..] } else { site_ids };
        debug!(count = site_ids.len(), "Requesting location info");

        let tags = site_ids
            .iter()
            .enumerate()
            .map(|(i, site_id)| {
                (
                    format!("location__{}", i),
                    ElementTag::new()
                        .attr("action", "info")
                        .inner(Tags::new().with("site_id", site_id)),
                )
            })
            .collect();
        self.send_locations(tags).await
    }

    pub async fn location_info_values_list(&self, site_ids: &[String]) -> Result<Vec<Record>, ApiError> {
        let response = self.get_locations_info(site_ids).await?;
        let schema = XmlSchema::parse(&response)?;
        Ok(schema.search(&Predicate::contains("site_id", "")))
    }

    pub async fn add_location(&self, fields: &LocationFields) -> Result<String, ApiError> {
        fields.validate()?;
        info!(site_id = %fields.site_id, "Adding location");
        self.send_locations(location_action("add", fields, None)).await
    }

    // Update a location, renaming it to `new_site_id` when given.
    pub async fn update_location(
        &self,
        fields: &LocationFields,
        new_site_id: Option<&str>,
    ) -> Result<String, ApiError> {
        fields.validate()?;
        info!(site_id = %fields.site_id, ?new_site_id, "Updating location");
        self.send_locations(location_action("update", fields, new_site_id))
            .await
    }

    pub async fn delete_location(&self, site_id: &str) -> Result<String, ApiError> {
        if site_id.is_empty() {
            return Err(ApiError::ApiCall("site_id cannot be empty".to_string()));
        }
        info!(site_id, "Deleting location");
        self.send_locations(Tags::new().with(
            "location",
            ElementTag::new()
                .attr("action", "delete")
                .inner(Tags::new().with("site_id", site_id)),
        ))
        .await
    }
}

fn location_action(action: &str, fields: &LocationFields, new_site_id: Option<&str>) -> Tags {
    let mut inner = Tags::new().with("site_id", &fields.site_id);
    if let Some(new_site_id) = new_site_id.filter(|id| !id.is_empty()) {
        inner.push("new_site_id", new_site_id);
    }
    inner.push("name", &fields.name);
    inner.push("short_name", &fields.short_name);
    inner.extend(fields.extra.clone());

    Tags::new().with(
        "location",
        ElementTag::new().attr("action", action).inner(inner),
    )
}
