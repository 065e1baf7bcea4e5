// Schedule service connection: GetSchedule requests and shift extraction
use crate::helpers::{parse_date, DATE_FORMAT};
use crate::settings::{Credentials, Service, Settings};
use crate::soap::{build_request, ApiError, HttpSoapTransport, SoapTransport};
use crate::table::Table;
use crate::xmlmanip::{inject_tags, Predicate, Record, Tags, XmlSchema, XmlValue};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SCHEDULE_TEMPLATE: &str = r#"<tangier version="1.0" method="schedule.request"></tangier>"#;
pub const GET_SCHEDULE: &str = "GetSchedule";

// Format of `@shiftdate` and of full start times.
pub const IN_DATE_FORMAT: &str = "%m/%d/%Y";
pub const TIME_FORMAT: &str = "%I:%M %p";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const TESTING_SAMPLE_SIZE: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleQuery {
    pub start_date: String,
    pub end_date: String,
    pub site_id: Option<String>,
    pub emp_id: Option<String>,
    // Extra tags appended inside `<schedule/>`.
    pub tags: Tags,
    // Replaces the connection's credential template.
    pub xml_string: Option<String>,
}

impl ScheduleQuery {
    pub fn for_site(start_date: &str, end_date: &str, site_id: &str) -> Self {
        Self {
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            site_id: Some(site_id.to_string()),
            ..Default::default()
        }
    }

    pub fn for_employee(start_date: &str, end_date: &str, emp_id: &str) -> Self {
        Self {
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            emp_id: Some(emp_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_template(mut self, xml_string: &str) -> Self {
        self.xml_string = Some(xml_string.to_string());
        self
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.start_date.is_empty()
            || self.end_date.is_empty()
            || (self.site_id.is_none() && self.emp_id.is_none())
        {
            return Err(ApiError::ApiCall(
                "start_date, end_date, and (site_id or emp_id) are all required.".to_string(),
            ));
        }
        validate_range(&self.start_date, &self.end_date)
    }

    fn request_tags(&self) -> Tags {
        let mut tags = Tags::new();
        if let Some(site_id) = &self.site_id {
            tags.push("site_id", site_id);
        }
        if let Some(emp_id) = &self.emp_id {
            tags.push("emp_id", emp_id);
        }
        tags.push("start_date", &self.start_date);
        tags.push("end_date", &self.end_date);
        tags.extend(self.tags.clone());
        tags
    }
}

// Which ids a multi-request schedule pull iterates over.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleTarget {
    Sites(Vec<String>),
    Employees(Vec<String>),
    // The site list the connection was configured with.
    Configured,
}

pub struct ScheduleConnection {
    transport: Arc<dyn SoapTransport>,
    base_xml: String,
    site_ids: Vec<String>,
    debug: bool,
    last_request: Mutex<Option<String>>,
}

impl ScheduleConnection {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let transport = HttpSoapTransport::from_settings(settings, Service::Schedule)?;
        Ok(Self::with_transport(Arc::new(transport), &settings.credentials(), None)?
            .with_debug(settings.debug))
    }

    // Inject `user_name`/`user_pwd` into `base_xml` (default: the schedule template).
    pub fn with_transport(
        transport: Arc<dyn SoapTransport>,
        credentials: &Credentials,
        base_xml: Option<&str>,
    ) -> Result<Self, ApiError> {
        let base_xml = inject_tags(
            base_xml.unwrap_or(SCHEDULE_TEMPLATE),
            "",
            0,
            &Tags::new()
                .with("user_name", &credentials.username)
                .with("user_pwd", &credentials.password),
        )?;
        Ok(Self {
            transport,
            base_xml,
            site_ids: Vec::new(),
            debug: false,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_site_ids(mut self, site_ids: Vec<String>) -> Self {
        self.site_ids = site_ids;
        self
    }

    // Read site ids from the `column_header` column of a CSV file. In `testing` mode a
    // random sample of twenty ids is kept.
    pub fn with_site_file(
        mut self,
        path: &Path,
        column_header: &str,
        testing: bool,
    ) -> Result<Self, ApiError> {
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv {
            warn!(path = %path.display(), "Did not read site file; must be a csv document");
            return Ok(self);
        }

        let table = Table::from_csv_path(path)?;
        if !table.has_column(column_header) {
            warn!(column_header, "Site ids must be in a column with the given header");
            return Ok(self);
        }

        let mut site_ids: Vec<String> = table
            .rows()
            .iter()
            .map(|row| row.get(column_header).to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if testing {
            site_ids = site_ids
                .choose_multiple(&mut rand::thread_rng(), TESTING_SAMPLE_SIZE)
                .cloned()
                .collect();
        }
        info!(count = site_ids.len(), "Loaded site ids");
        self.site_ids = site_ids;
        Ok(self)
    }

    pub fn base_xml(&self) -> &str {
        &self.base_xml
    }

    pub fn site_ids(&self) -> &[String] {
        &self.site_ids
    }

    // Last request document, retained only in debug mode.
    pub fn last_request(&self) -> Option<String> {
        self.last_request.lock().clone()
    }

    // Raw `GetSchedule` with a fully formed request document.
    pub async fn call_get_schedule(&self, xml_string: &str) -> Result<String, ApiError> {
        self.transport.call(GET_SCHEDULE, xml_string).await
    }

    /// Schedule for one site or employee over a date range.
    pub async fn get_schedule(&self, query: &ScheduleQuery) -> Result<String, ApiError> {
        query.validate()?;
        let template = query.xml_string.as_deref().unwrap_or(&self.base_xml);
        let xml_string = build_request(template, "schedule", &query.request_tags())?;

        if self.debug {
            *self.last_request.lock() = Some(xml_string.clone());
        }
        debug!(
            site_id = ?query.site_id,
            emp_id = ?query.emp_id,
            start_date = %query.start_date,
            end_date = %query.end_date,
            "Requesting schedule"
        );
        self.call_get_schedule(&xml_string).await
    }

    // One request per site; an empty list falls back to the configured sites.
    pub async fn get_schedules(
        &self,
        start_date: &str,
        end_date: &str,
        site_ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        let site_ids = if site_ids.is_empty() {
            &self.site_ids
        } else {
            site_ids
        };
        if site_ids.is_empty() || start_date.is_empty() || end_date.is_empty() {
            return Err(ApiError::ApiCall(
                "site_ids, start_date and end_date are all required.".to_string(),
            ));
        }

        let mut schedules = Vec::with_capacity(site_ids.len());
        for site_id in site_ids {
            schedules.push(
                self.get_schedule(&ScheduleQuery::for_site(start_date, end_date, site_id))
                    .await?,
            );
        }
        Ok(schedules)
    }

    /// Every shift for the targets over the range, one record per shift with
    /// `shift_start_date` and `shift_end_date` added.
    pub async fn get_schedule_values_list(
        &self,
        start_date: &str,
        end_date: &str,
        target: &ScheduleTarget,
        tags: &Tags,
    ) -> Result<Vec<Record>, ApiError> {
        let (ids, by_site) = match target {
            ScheduleTarget::Sites(ids) => (ids.as_slice(), true),
            ScheduleTarget::Employees(ids) => (ids.as_slice(), false),
            ScheduleTarget::Configured => (self.site_ids.as_slice(), true),
        };
        if ids.is_empty() {
            return Err(ApiError::ApiCall("site_ids or emp_ids is required.".to_string()));
        }

        let mut values = Vec::new();
        for id in ids {
            let query = if by_site {
                ScheduleQuery::for_site(start_date, end_date, id)
            } else {
                ScheduleQuery::for_employee(start_date, end_date, id)
            };
            let query = query.with_tags(tags.clone());

            let response = self.get_schedule(&query).await?;
            values.extend(schedule_values(&response)?);
        }
        Ok(values)
    }
}

// Shift records of one `GetSchedule` response.
pub fn schedule_values(response: &str) -> Result<Vec<Record>, ApiError> {
    let schema = XmlSchema::parse(response)?;
    let mut values = Vec::new();
    for day in schema.search(&Predicate::not_equals("@shiftdate", "")) {
        values.extend(extract_shifts(&day)?);
    }
    Ok(values)
}

// Expand one `<date shiftdate="..">` mapping into shift records.
pub fn extract_shifts(day: &Record) -> Result<Vec<Record>, ApiError> {
    let shift_date_str = day.text("@shiftdate").unwrap_or_default();
    let shift_date = NaiveDate::parse_from_str(shift_date_str.trim(), IN_DATE_FORMAT)
        .map_err(|e| ApiError::Date(format!("bad shiftdate '{}': {}", shift_date_str, e)))?;

    let shifts = day
        .get("shifts")
        .and_then(XmlValue::as_map)
        .and_then(|shifts| shifts.get("shift"))
        .map(XmlValue::maps)
        .unwrap_or_default();

    shifts
        .into_iter()
        .map(|shift| {
            let start = time_and_date_to_iso(shift.text("actualstarttime").unwrap_or_default(), shift_date)?;
            let end = add_minutes(&start, shift.text("reportedminutes").unwrap_or_default())?;

            let mut record = Record::default();
            record.insert("shift_end_date", XmlValue::Text(end));
            record.insert("shift_start_date", XmlValue::Text(start));
            for (key, value) in shift.iter() {
                record.insert(key, value.clone());
            }
            Ok(record)
        })
        .collect()
}

// Older servers send `07:00 AM`, newer ones `5/1/2017 07:00 AM`.
pub fn time_and_date_to_iso(time: &str, date: NaiveDate) -> Result<String, ApiError> {
    let time = time.trim();
    let full_format = format!("{} {}", IN_DATE_FORMAT, TIME_FORMAT);
    let datetime = match NaiveDateTime::parse_from_str(time, &full_format) {
        Ok(datetime) => datetime,
        Err(_) => {
            let clock = NaiveTime::parse_from_str(time, TIME_FORMAT).map_err(|e| {
                ApiError::Date(format!("bad start time '{}' on {}: {}", time, date.format(DATE_FORMAT), e))
            })?;
            date.and_time(clock)
        }
    };
    Ok(datetime.format(DATETIME_FORMAT).to_string())
}

pub fn parse_iso(datetime: &str) -> Result<NaiveDateTime, ApiError> {
    NaiveDateTime::parse_from_str(datetime.trim(), DATETIME_FORMAT)
        .map_err(|e| ApiError::Date(format!("bad datetime '{}': {}", datetime, e)))
}

fn add_minutes(start: &str, minutes: &str) -> Result<String, ApiError> {
    let start = parse_iso(start)?;
    let bad_minutes = || ApiError::Date(format!("bad reportedminutes '{}'", minutes));
    let parsed: f64 = minutes.trim().parse().map_err(|_| bad_minutes())?;
    if !parsed.is_finite() {
        return Err(bad_minutes());
    }
    // `as` saturates, so out of range counts fail in try_minutes or checked_add_signed
    let end = Duration::try_minutes(parsed.trunc() as i64)
        .and_then(|delta| start.checked_add_signed(delta))
        .ok_or_else(bad_minutes)?;
    Ok(end.format(DATETIME_FORMAT).to_string())
}

// Both dates must be `%Y-%m-%d` and in order
pub fn validate_range(start_date: &str, end_date: &str) -> Result<(), ApiError> {
    let start = parse_date(start_date)?;
    let end = parse_date(end_date)?;
    if start > end {
        return Err(ApiError::ApiCall(format!(
            "start_date {} is after end_date {}",
            start_date, end_date
        )));
    }
    Ok(())
}
