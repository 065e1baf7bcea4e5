// Concurrent schedule requests. Tangier handles parallel GetSchedule calls poorly, so
// this is usually slower than ScheduleConnection; use it for bulk pulls where failures
// are collected and retried instead of aborting the run.
use crate::schedule::{GET_SCHEDULE, SCHEDULE_TEMPLATE};
use crate::settings::{Credentials, Service, Settings};
use crate::soap::{build_request, ApiError, HttpSoapTransport, SoapTransport};
use crate::table::{record_values, Table};
use crate::xmlmanip::{inject_tags, Predicate, Record, Tags, XmlSchema};
use futures::future::join_all;
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub start_date: String,
    pub end_date: String,
    pub site_id: String,
}

// Outcome of one request, tagged with its position in the request list.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedResponse {
    pub index: usize,
    pub request: ScheduleRequest,
    pub item: Result<String, ApiError>,
}

pub struct AsyncScheduleConnection {
    transport: Arc<dyn SoapTransport>,
    base_xml: String,
    max_concurrent: usize,
    good_responses: Mutex<Vec<IndexedResponse>>,
    bad_responses: Mutex<Vec<IndexedResponse>>,
}

impl AsyncScheduleConnection {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let transport = HttpSoapTransport::from_settings(settings, Service::Schedule)?;
        Self::with_transport(Arc::new(transport), &settings.credentials(), None)
    }

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
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            good_responses: Mutex::new(Vec::new()),
            bad_responses: Mutex::new(Vec::new()),
        })
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn good_responses(&self) -> Vec<IndexedResponse> {
        self.good_responses.lock().clone()
    }

    pub fn bad_responses(&self) -> Vec<IndexedResponse> {
        self.bad_responses.lock().clone()
    }

    pub fn generate_request_list(
        &self,
        start_date: &str,
        end_date: &str,
        site_ids: &[String],
    ) -> Result<Vec<ScheduleRequest>, ApiError> {
        if site_ids.is_empty() {
            return Err(ApiError::ApiCall(
                "site_ids must be a non-empty list for a concurrent pull.".to_string(),
            ));
        }
        Ok(site_ids
            .iter()
            .map(|site_id| ScheduleRequest {
                start_date: start_date.to_string(),
                end_date: end_date.to_string(),
                site_id: site_id.clone(),
            })
            .collect())
    }

    fn request_xml(&self, request: &ScheduleRequest, tags: &Tags) -> Result<String, ApiError> {
        let mut schedule_tags = Tags::new()
            .with("site_id", &request.site_id)
            .with("start_date", &request.start_date)
            .with("end_date", &request.end_date);
        schedule_tags.extend(tags.clone());
        Ok(build_request(&self.base_xml, "schedule", &schedule_tags)?)
    }

    /// Issue every request concurrently. Individual failures are returned in place;
    /// the outcomes are also sorted into the good and bad buckets.
    pub async fn get_schedules(
        &self,
        requests: &[ScheduleRequest],
        tags: &Tags,
    ) -> Result<Vec<Result<String, ApiError>>, ApiError> {
        let documents = requests
            .iter()
            .map(|request| self.request_xml(request, tags))
            .collect::<Result<Vec<_>, _>>()?;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let calls = documents.iter().map(|xml_string| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| ApiError::Network("request semaphore closed".to_string()))?;
                self.transport.call(GET_SCHEDULE, xml_string).await
            }
        });
        let results = join_all(calls).await;

        let (good, bad) = sort_bad_and_good(&results, requests);
        info!(good = good.len(), bad = bad.len(), "Concurrent schedule pull finished");
        *self.good_responses.lock() = good;
        *self.bad_responses.lock() = bad;
        Ok(results)
    }

    // Re-issue every failed request once and put the new outcomes where the failures were.
    pub async fn try_bad_again(
        &self,
        mut results: Vec<Result<String, ApiError>>,
        requests: &[ScheduleRequest],
        tags: &Tags,
    ) -> Result<Vec<Result<String, ApiError>>, ApiError> {
        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.is_err())
            .map(|(index, _)| index)
            .collect();
        if failed.is_empty() {
            return Ok(results);
        }

        let retry_requests: Vec<ScheduleRequest> = failed
            .iter()
            .filter_map(|&index| requests.get(index).cloned())
            .collect();
        warn!(failed = retry_requests.len(), total = requests.len(), "Re-attempting bad responses");
        let retried = self.get_schedules(&retry_requests, tags).await?;

        for (index, result) in failed.into_iter().zip(retried) {
            results[index] = result;
        }
        let (good, bad) = sort_bad_and_good(&results, requests);
        *self.good_responses.lock() = good;
        *self.bad_responses.lock() = bad;
        Ok(results)
    }
}

pub fn sort_bad_and_good(
    results: &[Result<String, ApiError>],
    requests: &[ScheduleRequest],
) -> (Vec<IndexedResponse>, Vec<IndexedResponse>) {
    results
        .iter()
        .zip(requests)
        .enumerate()
        .map(|(index, (item, request))| IndexedResponse {
            index,
            request: request.clone(),
            item: item.clone(),
        })
        .partition(|response| response.item.is_ok())
}

pub fn bad_to_new_request(responses: &[IndexedResponse]) -> Vec<ScheduleRequest> {
    responses
        .iter()
        .filter(|response| response.item.is_err())
        .map(|response| response.request.clone())
        .collect()
}

// Every shift record (anything carrying a `siteid`) in the given responses.
pub fn get_values_list(responses: &[String]) -> Result<Vec<Record>, ApiError> {
    let mut values = Vec::new();
    for response in responses {
        values.extend(XmlSchema::parse(response)?.search(&Predicate::contains("siteid", "")));
    }
    Ok(values)
}

// Shift records of the successful responses, tagged with their request number, written
// to `path` as JSON.
pub fn store_good(results: &[Result<String, ApiError>], path: &Path) -> Result<Table, ApiError> {
    let mut table = Table::new(vec!["request".to_string()]);
    for (request, result) in results.iter().enumerate() {
        let Ok(response) = result else { continue };
        for record in XmlSchema::parse(response)?.search(&Predicate::contains("siteid", "")) {
            let mut values = vec![("request".to_string(), request.to_string())];
            values.extend(record_values(&record));
            table.push_values(values);
        }
    }
    table.fill_missing();
    table.write_json(BufWriter::new(File::create(path)?))?;
    info!(rows = table.len(), path = %path.display(), "Stored good responses");
    Ok(table)
}
