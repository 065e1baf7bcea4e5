// Reports built on top of the connections: schedule clean-up, provider enrichment and
// the joined schedule/provider/location views
use crate::helpers::date_ranges;
use crate::location::{LocationConnection, ALL_SITE_IDS};
use crate::provider::{ProviderConnection, ProviderQuery};
use crate::schedule::{parse_iso, ScheduleConnection, ScheduleTarget};
use crate::soap::{build_request, ApiError};
use crate::table::{Join, Table};
use crate::xmlmanip::{ElementTag, Predicate, Record, Tags, XmlSchema};
use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const PROVIDER_KEY: &str = "provider_primary_key";

const NO_SAVED_SCHEDULE: &str = "There must be a saved schedule from save_schedule_from_range.";

// Two shifts of the same provider that duplicate or overlap each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftMatch {
    pub index: usize,
    pub match_index: usize,
    pub provider_primary_key: String,
    pub shift_start_date: String,
    pub shift_end_date: String,
    pub match_shift_start_date: String,
    pub match_shift_end_date: String,
}

struct Shift<'a> {
    index: usize,
    start: NaiveDateTime,
    end: NaiveDateTime,
    start_text: &'a str,
    end_text: &'a str,
}

fn is_duplicate(a: &Shift<'_>, b: &Shift<'_>) -> bool {
    a.start == b.start && a.end == b.end
}

fn is_conflict(a: &Shift<'_>, b: &Shift<'_>) -> bool {
    a.start < b.end && a.end > b.start
}

// A schedule connection holding a saved schedule to inspect and clean.
pub struct ScheduleManipulation {
    connection: ScheduleConnection,
    saved_schedule: Option<Table>,
}

impl ScheduleManipulation {
    pub fn new(connection: ScheduleConnection) -> Self {
        Self {
            connection,
            saved_schedule: None,
        }
    }

    pub fn connection(&self) -> &ScheduleConnection {
        &self.connection
    }

    pub fn saved_schedule(&self) -> Option<&Table> {
        self.saved_schedule.as_ref()
    }

    pub fn set_saved_schedule(&mut self, schedule: Table) {
        self.saved_schedule = Some(schedule);
    }

    fn saved(&self) -> Result<&Table, ApiError> {
        self.saved_schedule
            .as_ref()
            .ok_or_else(|| ApiError::ApiCall(NO_SAVED_SCHEDULE.to_string()))
    }

    /// Pull the schedule in eight-week windows, sorted by shift start then end.
    pub async fn save_schedule_from_range(
        &mut self,
        start_date: &str,
        end_date: &str,
        target: &ScheduleTarget,
        tags: &Tags,
    ) -> Result<(), ApiError> {
        let mut values = Vec::new();
        for (range_start, range_end) in date_ranges(start_date, end_date)? {
            info!(start = %range_start, end = %range_end, "Fetching schedule range");
            values.extend(
                self.connection
                    .get_schedule_values_list(&range_start, &range_end, target, tags)
                    .await?,
            );
        }

        let mut schedule = Table::from_records(&values);
        if schedule.is_empty() {
            return Err(ApiError::ApiCall(
                "No schedule was returned in the given range.".to_string(),
            ));
        }
        schedule.sort_by_columns(&["shift_start_date", "shift_end_date"]);
        schedule.reset_index();
        info!(shifts = schedule.len(), "Saved schedule");
        self.saved_schedule = Some(schedule);
        Ok(())
    }

    pub fn get_schedule_open(&self) -> Result<Table, ApiError> {
        Ok(self.saved()?.filter(|row| row.get("providername") == "open"))
    }

    // Shifts that were never worked.
    pub fn get_schedule_empties(&self) -> Result<Table, ApiError> {
        Ok(self.saved()?.filter(|row| row.get("reportedminutes") == "0"))
    }

    pub fn get_schedule_duplicates(&self) -> Result<Vec<ShiftMatch>, ApiError> {
        self.find_matches(is_duplicate)
    }

    pub fn get_schedule_conflicts(&self) -> Result<Vec<ShiftMatch>, ApiError> {
        self.find_matches(is_conflict)
    }

    fn find_matches(
        &self,
        is_match: fn(&Shift<'_>, &Shift<'_>) -> bool,
    ) -> Result<Vec<ShiftMatch>, ApiError> {
        let schedule = self.saved()?;
        if !schedule.has_column(PROVIDER_KEY) {
            return Err(ApiError::ApiCall(
                "Duplicate and conflict checks rely on provider_primary_key being present in the schedule."
                    .to_string(),
            ));
        }

        let providers: Vec<String> = schedule
            .unique(PROVIDER_KEY)
            .into_iter()
            .filter(|key| !key.is_empty())
            .collect();

        let mut matches = Vec::new();
        for (count, provider) in providers.iter().enumerate() {
            debug!(provider = %provider, progress = count + 1, total = providers.len(), "Scanning shifts");
            let mut shifts = schedule
                .rows()
                .iter()
                .filter(|row| row.get(PROVIDER_KEY) == provider)
                .map(|row| {
                    Ok(Shift {
                        index: row.index,
                        start: parse_iso(row.get("shift_start_date"))?,
                        end: parse_iso(row.get("shift_end_date"))?,
                        start_text: row.get("shift_start_date"),
                        end_text: row.get("shift_end_date"),
                    })
                })
                .collect::<Result<Vec<_>, ApiError>>()?;
            shifts.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

            for (position, shift) in shifts.iter().enumerate() {
                for other in &shifts[position + 1..] {
                    if other.start > shift.end {
                        break;
                    }
                    if is_match(shift, other) {
                        matches.push(ShiftMatch {
                            index: shift.index,
                            match_index: other.index,
                            provider_primary_key: provider.clone(),
                            shift_start_date: shift.start_text.to_string(),
                            shift_end_date: shift.end_text.to_string(),
                            match_shift_start_date: other.start_text.to_string(),
                            match_shift_end_date: other.end_text.to_string(),
                        });
                    }
                }
            }
        }
        Ok(matches)
    }

    pub fn generate_duplicates_report(&self, duplicates: &[ShiftMatch]) -> Result<Table, ApiError> {
        self.generate_match_report(duplicates)
    }

    pub fn generate_conflicts_report(&self, conflicts: &[ShiftMatch]) -> Result<Table, ApiError> {
        self.generate_match_report(conflicts)
    }

    // Original and matching rows, alternating, numbered by match in the `match` column.
    fn generate_match_report(&self, matches: &[ShiftMatch]) -> Result<Table, ApiError> {
        let schedule = self.saved()?;
        let mut columns = vec!["match".to_string(), "index".to_string()];
        columns.extend(schedule.columns().iter().cloned());
        let mut report = Table::new(columns);

        for (number, shift_match) in matches.iter().enumerate() {
            for index in [shift_match.index, shift_match.match_index] {
                let row = schedule.get(index).ok_or_else(|| {
                    ApiError::Report(format!("row {} is not in the saved schedule", index))
                })?;
                let mut values = vec![
                    ("match".to_string(), number.to_string()),
                    ("index".to_string(), index.to_string()),
                ];
                values.extend(row.values.iter().map(|(k, v)| (k.clone(), v.clone())));
                report.push_values(values);
            }
        }
        Ok(report)
    }

    pub fn remove_schedule_open(&mut self) -> Result<usize, ApiError> {
        let indices = self.get_schedule_open()?.indices().into_iter().collect();
        self.remove_rows(indices, "open shifts")
    }

    pub fn remove_schedule_empties(&mut self) -> Result<usize, ApiError> {
        let indices = self.get_schedule_empties()?.indices().into_iter().collect();
        self.remove_rows(indices, "empties")
    }

    // Drops the later row of each duplicate pair.
    pub fn remove_schedule_duplicates(&mut self) -> Result<usize, ApiError> {
        let indices = self
            .get_schedule_duplicates()?
            .iter()
            .map(|m| m.match_index)
            .collect();
        self.remove_rows(indices, "duplicates")
    }

    // Drops both rows of each conflicting pair.
    pub fn remove_schedule_conflicts(&mut self) -> Result<usize, ApiError> {
        let indices = self
            .get_schedule_conflicts()?
            .iter()
            .flat_map(|m| [m.index, m.match_index])
            .collect();
        self.remove_rows(indices, "conflicts")
    }

    fn remove_rows(&mut self, indices: HashSet<usize>, label: &str) -> Result<usize, ApiError> {
        let schedule = self.saved()?;
        if indices.is_empty() {
            info!("No {} to remove.", label);
            return Ok(0);
        }

        let remaining = schedule.drop_indices(&indices);
        if remaining.len() + indices.len() != schedule.len() {
            return Err(ApiError::Report(
                "An unexpected number of entries were removed; this indicates an issue with the saved schedule."
                    .to_string(),
            ));
        }
        self.saved_schedule = Some(remaining);
        info!("Removed {} {}.", indices.len(), label);
        Ok(indices.len())
    }
}

// A provider connection paired with a report keyed by provider id.
pub struct ProviderReport {
    connection: ProviderConnection,
    table: Table,
}

impl ProviderReport {
    pub fn new(connection: ProviderConnection, table: Table) -> Self {
        Self { connection, table }
    }

    pub fn from_csv(connection: ProviderConnection, path: &Path) -> Result<Self, ApiError> {
        Ok(Self::new(connection, Table::from_csv_path(path)?))
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn into_table(self) -> Table {
        self.table
    }

    /// Add a `provider_{field}` column per field, filled from the provider whose
    /// `emp_id` matches `key_column`.
    pub async fn add_to_report(&mut self, fields: &[&str], key_column: &str) -> Result<(), ApiError> {
        if !self.table.has_column(key_column) {
            return Err(ApiError::Report(format!("no '{}' column in the report", key_column)));
        }
        for row in self.table.rows_mut() {
            let id = clean_provider_id(row.get(key_column))?;
            row.set(key_column, id);
        }

        let ids = self.table.unique(key_column);
        info!(providers = ids.len(), "Adding provider info to report");
        let info = if ids.is_empty() {
            Vec::new()
        } else {
            self.connection
                .provider_info_values_list(&ProviderQuery::by_emp_ids(ids))
                .await?
        };

        let new_columns: Vec<String> = fields.iter().map(|f| format!("provider_{}", f)).collect();
        for column in &new_columns {
            self.table.add_column(column, "");
        }
        for row in self.table.rows_mut() {
            let key = row.get(key_column).to_string();
            if let Some(provider) = info.iter().find(|p| p.text("emp_id") == Some(key.as_str())) {
                for (field, column) in fields.iter().zip(&new_columns) {
                    row.set(column.as_str(), provider.text(field).unwrap_or_default());
                }
            }
        }

        let mut first = vec![key_column.to_string()];
        first.extend(new_columns);
        self.table.reorder_columns(&first);
        Ok(())
    }
}

// Numeric ids become integer strings; blank ids or anything with letters become `"0"`.
pub fn clean_provider_id(raw: &str) -> Result<String, ApiError> {
    if raw.trim().is_empty() || raw.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok("0".to_string());
    }
    raw.trim()
        .parse::<f64>()
        .map(|id| (id.trunc() as i64).to_string())
        .map_err(|_| ApiError::Report(format!("'{}' is not a provider id", raw)))
}

// Schedule joined with provider and location details.
pub struct ScheduleWithData {
    schedule: ScheduleManipulation,
    providers: ProviderConnection,
    locations: LocationConnection,
    saved_schedule: Option<Table>,
}

impl ScheduleWithData {
    pub fn new(
        schedule: ScheduleConnection,
        providers: ProviderConnection,
        locations: LocationConnection,
    ) -> Self {
        Self {
            schedule: ScheduleManipulation::new(schedule),
            providers,
            locations,
            saved_schedule: None,
        }
    }

    pub fn saved_schedule(&self) -> Option<&Table> {
        self.saved_schedule.as_ref()
    }

    pub fn schedule(&self) -> &ScheduleManipulation {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut ScheduleManipulation {
        &mut self.schedule
    }

    async fn provider_table(&self) -> Result<Table, ApiError> {
        let values = self
            .providers
            .provider_info_values_list(&ProviderQuery::all())
            .await?;
        let mut table = Table::from_records(&values);
        table.fill_missing();
        Ok(table)
    }

    async fn location_table(&self) -> Result<Table, ApiError> {
        let values = self
            .locations
            .location_info_values_list(&[ALL_SITE_IDS.to_string()])
            .await?;
        let mut table = Table::from_records(&values);
        table.fill_missing();
        Ok(table)
    }

    pub async fn save_schedule_from_range(&mut self, start_date: &str, end_date: &str) -> Result<(), ApiError> {
        let mut providers = self.provider_table().await?;
        let mut locations = self.location_table().await?;

        let site_ids = locations.unique("site_id");
        self.schedule
            .save_schedule_from_range(
                start_date,
                end_date,
                &ScheduleTarget::Sites(site_ids),
                &Tags::new().with("include_provider_primary_key", "true"),
            )
            .await?;
        let schedule = self.schedule.saved()?;

        locations.drop_columns(&["@action", "is_scheduled"]);
        locations.rename_columns(&[("name", "site_name"), ("short_name", "site_short_name")]);
        providers.drop_columns(&["@action", "processed", "comment", "street", "city", "state", "zip"]);

        let mut with_sites = schedule.merge(&locations, &["siteid"], &["site_id"], Join::Left);
        with_sites.drop_columns(&["location"]);
        let mut with_all = with_sites.merge(
            &providers,
            &["providerprimarykey"],
            &[PROVIDER_KEY],
            Join::Left,
        );
        with_all.drop_columns(&["empid", "siteid", "providerprimarykey"]);
        with_all.fill_missing();

        info!(shifts = with_all.len(), "Joined schedule with provider and location data");
        self.schedule.set_saved_schedule(with_all.clone());
        self.saved_schedule = Some(with_all);
        Ok(())
    }
}

// Provider listings per location, joined with the full provider list.
pub struct ProviderLocations {
    providers: ProviderConnection,
    all_locations: Vec<Record>,
    all_providers: Vec<Record>,
    site_cache: DashMap<String, Vec<Record>>,
    all_location_provider_values: OnceCell<Vec<Record>>,
}

impl ProviderLocations {
    // Fetches every location and every provider up front.
    pub async fn new(providers: ProviderConnection, locations: &LocationConnection) -> Result<Self, ApiError> {
        let all_locations = locations.location_info_values_list(&[]).await?;
        let all_providers = providers.provider_info_values_list(&ProviderQuery::all()).await?;
        Ok(Self {
            providers,
            all_locations,
            all_providers,
            site_cache: DashMap::new(),
            all_location_provider_values: OnceCell::new(),
        })
    }

    pub fn all_locations(&self) -> &[Record] {
        &self.all_locations
    }

    pub fn all_providers(&self) -> &[Record] {
        &self.all_providers
    }

    // Provider info request for every provider of one site.
    pub async fn location_provider_info(&self, site_id: &str) -> Result<String, ApiError> {
        let tags = Tags::new().with(
            "provider",
            ElementTag::new().attr("action", "info").inner(
                Tags::new()
                    .with("site_id", site_id)
                    .with(PROVIDER_KEY, "ALL"),
            ),
        );
        let xml_string = build_request(self.providers.base_xml(), "providers", &tags)?;
        self.providers.maintain_providers(&xml_string).await
    }

    pub async fn location_provider_values(&self, site_id: &str) -> Result<Vec<Record>, ApiError> {
        if let Some(cached) = self.site_cache.get(site_id) {
            return Ok(cached.value().clone());
        }
        let response = self.location_provider_info(site_id).await?;
        let values = XmlSchema::parse(&response)?.search(&Predicate::not_equals("site_id", ""));
        self.site_cache.insert(site_id.to_string(), values.clone());
        Ok(values)
    }

    // Providers of every location, fetched on first access.
    pub async fn all_location_provider_values(&self) -> Result<&[Record], ApiError> {
        let values = self
            .all_location_provider_values
            .get_or_try_init(|| async {
                let mut values = Vec::new();
                for location in &self.all_locations {
                    let site_id = location.text("site_id").unwrap_or_default();
                    info!(site_id, "Fetching location providers");
                    values.extend(self.location_provider_values(site_id).await?);
                }
                Ok::<_, ApiError>(values)
            })
            .await?;
        Ok(values.as_slice())
    }

    pub async fn join_all_locations_with_all_providers(&self) -> Result<Table, ApiError> {
        let location_providers = Table::from_records(self.all_location_provider_values().await?);
        let providers = Table::from_records(&self.all_providers);
        Ok(location_providers.merge(
            &providers,
            &[PROVIDER_KEY, "emp_id"],
            &[PROVIDER_KEY, "emp_id"],
            Join::Inner,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::MAINTAIN_LOCATIONS;
    use crate::provider::MAINTAIN_PROVIDERS;
    use crate::schedule::GET_SCHEDULE;
    use crate::settings::Credentials;
    use crate::soap::mock_transport::MockTransport;
    use crate::test_fixtures::{
        EMPTY_SCHEDULE_RESPONSE, LOCATION_RESPONSE, PROVIDER_RESPONSE, SCHEDULE_RESPONSE,
        SITE_PROVIDERS_RESPONSE,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use test_case::test_case;

    fn credentials() -> Credentials {
        Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        }
    }

    fn schedule_connection(transport: Arc<MockTransport>) -> ScheduleConnection {
        ScheduleConnection::with_transport(transport, &credentials(), None).unwrap()
    }

    fn provider_connection(transport: Arc<MockTransport>) -> ProviderConnection {
        ProviderConnection::with_transport(transport, &credentials(), None).unwrap()
    }

    fn location_connection(transport: Arc<MockTransport>) -> LocationConnection {
        LocationConnection::with_transport(transport, &credentials(), None).unwrap()
    }

    fn shift(key: &str, start: &str, end: &str, name: &str, minutes: &str) -> BTreeMap<String, String> {
        [
            (PROVIDER_KEY, key),
            ("shift_start_date", start),
            ("shift_end_date", end),
            ("providername", name),
            ("reportedminutes", minutes),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    // 0 and 1 duplicate, 2 overlaps both, 3 is a different provider, 4 is open
    fn manipulation_with_saved() -> ScheduleManipulation {
        let columns = [PROVIDER_KEY, "shift_start_date", "shift_end_date", "providername", "reportedminutes"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let rows = vec![
            shift("1", "2017-05-01T07:00:00", "2017-05-01T15:00:00", "Smith", "480"),
            shift("1", "2017-05-01T07:00:00", "2017-05-01T15:00:00", "Smith", "480"),
            shift("1", "2017-05-01T14:00:00", "2017-05-01T22:00:00", "Smith", "480"),
            shift("2", "2017-05-01T07:00:00", "2017-05-01T15:00:00", "Jones", "0"),
            shift("", "2017-05-01T07:00:00", "2017-05-01T15:00:00", "open", "0"),
        ];
        let mut manipulation = ScheduleManipulation::new(schedule_connection(Arc::new(MockTransport::new())));
        manipulation.set_saved_schedule(Table::from_rows(rows, columns));
        manipulation
    }

    #[test]
    fn test_requires_saved_schedule() {
        let manipulation = ScheduleManipulation::new(schedule_connection(Arc::new(MockTransport::new())));
        assert!(matches!(manipulation.get_schedule_open(), Err(ApiError::ApiCall(_))));
        assert!(matches!(manipulation.get_schedule_duplicates(), Err(ApiError::ApiCall(_))));
    }

    #[test]
    fn test_open_and_empties() {
        let manipulation = manipulation_with_saved();
        assert_eq!(manipulation.get_schedule_open().unwrap().indices(), vec![4]);
        assert_eq!(manipulation.get_schedule_empties().unwrap().indices(), vec![3, 4]);
    }

    #[test]
    fn test_duplicates() {
        let manipulation = manipulation_with_saved();
        let duplicates = manipulation.get_schedule_duplicates().unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!((duplicates[0].index, duplicates[0].match_index), (0, 1));
        assert_eq!(duplicates[0].match_shift_end_date, "2017-05-01T15:00:00");
    }

    #[test]
    fn test_conflicts() {
        let manipulation = manipulation_with_saved();
        let pairs: Vec<(usize, usize)> = manipulation
            .get_schedule_conflicts()
            .unwrap()
            .iter()
            .map(|m| (m.index, m.match_index))
            .collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_match_requires_provider_key() {
        let mut manipulation = ScheduleManipulation::new(schedule_connection(Arc::new(MockTransport::new())));
        let mut table = Table::default();
        table.push_values(vec![("providername".to_string(), "open".to_string())]);
        manipulation.set_saved_schedule(table);
        assert!(matches!(manipulation.get_schedule_conflicts(), Err(ApiError::ApiCall(_))));
    }

    #[test]
    fn test_duplicates_report_alternates_rows() {
        let manipulation = manipulation_with_saved();
        let duplicates = manipulation.get_schedule_duplicates().unwrap();
        let report = manipulation.generate_duplicates_report(&duplicates).unwrap();
        assert_eq!(report.columns()[..2], ["match".to_string(), "index".to_string()]);
        let pairs: Vec<(&str, &str)> = report
            .rows()
            .iter()
            .map(|r| (r.get("match"), r.get("index")))
            .collect();
        assert_eq!(pairs, vec![("0", "0"), ("0", "1")]);

        let empty = manipulation.generate_conflicts_report(&[]).unwrap();
        assert!(empty.is_empty());
    }

    #[test_case(ScheduleManipulation::remove_schedule_open, 1, 4; "open")]
    #[test_case(ScheduleManipulation::remove_schedule_empties, 2, 3; "empties")]
    #[test_case(ScheduleManipulation::remove_schedule_duplicates, 1, 4; "duplicates")]
    #[test_case(ScheduleManipulation::remove_schedule_conflicts, 3, 2; "conflicts")]
    fn test_remove(
        remove: fn(&mut ScheduleManipulation) -> Result<usize, ApiError>,
        removed: usize,
        remaining: usize,
    ) {
        let mut manipulation = manipulation_with_saved();
        assert_eq!(remove(&mut manipulation).unwrap(), removed);
        assert_eq!(manipulation.saved_schedule().unwrap().len(), remaining);
    }

    #[test]
    fn test_remove_nothing() {
        let mut manipulation = manipulation_with_saved();
        manipulation.remove_schedule_open().unwrap();
        assert_eq!(manipulation.remove_schedule_open().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_schedule_from_range() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(GET_SCHEDULE, SCHEDULE_RESPONSE);
        let mut manipulation = ScheduleManipulation::new(schedule_connection(transport.clone()));

        manipulation
            .save_schedule_from_range(
                "2017-01-01",
                "2017-03-31",
                &ScheduleTarget::Sites(vec!["100".to_string()]),
                &Tags::new(),
            )
            .await
            .unwrap();
        // Two eight-week windows, same canned response each time
        assert_eq!(transport.call_count(), 2);
        let saved = manipulation.saved_schedule().unwrap();
        assert_eq!(saved.len(), 6);
        assert_eq!(saved.indices(), (0..6).collect::<Vec<_>>());
        let starts: Vec<&str> = saved.rows().iter().map(|r| r.get("shift_start_date")).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[tokio::test]
    async fn test_empty_range_is_an_error() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(GET_SCHEDULE, EMPTY_SCHEDULE_RESPONSE);
        let mut manipulation = ScheduleManipulation::new(schedule_connection(transport));
        let result = manipulation
            .save_schedule_from_range(
                "2017-05-01",
                "2017-05-02",
                &ScheduleTarget::Sites(vec!["100".to_string()]),
                &Tags::new(),
            )
            .await;
        assert_eq!(
            result,
            Err(ApiError::ApiCall("No schedule was returned in the given range.".to_string()))
        );
    }

    #[test_case("1111", "1111")]
    #[test_case("1111.0", "1111")]
    #[test_case(" 42 ", "42")]
    #[test_case("A123", "0")]
    #[test_case("", "0")]
    #[test_case("   ", "0")]
    fn test_clean_provider_id(raw: &str, expected: &str) {
        assert_eq!(clean_provider_id(raw).unwrap(), expected);
    }

    #[test]
    fn test_clean_provider_id_rejects_symbols() {
        assert!(matches!(clean_provider_id("12-34"), Err(ApiError::Report(_))));
    }

    #[tokio::test]
    async fn test_add_to_report_blank_ids() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(MAINTAIN_PROVIDERS, PROVIDER_RESPONSE);

        let mut table = Table::default();
        for (name, id) in [("first", "1111"), ("blank", "")] {
            table.push_values(vec![
                ("name".to_string(), name.to_string()),
                ("provider_id".to_string(), id.to_string()),
            ]);
        }
        let mut report = ProviderReport::new(provider_connection(transport.clone()), table);
        report.add_to_report(&["npi"], "provider_id").await.unwrap();

        let table = report.table();
        assert_eq!(table.rows()[0].get("provider_npi"), "1234567890");
        assert_eq!(table.rows()[1].get("provider_id"), "0");
        assert_eq!(table.rows()[1].get("provider_npi"), "");
    }

    #[tokio::test]
    async fn test_add_to_empty_report_skips_fetch() {
        let transport = Arc::new(MockTransport::new());
        let table = Table::new(vec!["name".to_string(), "provider_id".to_string()]);
        let mut report = ProviderReport::new(provider_connection(transport.clone()), table);
        report.add_to_report(&["npi", "last_name"], "provider_id").await.unwrap();

        assert_eq!(
            report.table().columns(),
            &["provider_id", "provider_npi", "provider_last_name", "name"]
        );
        assert!(report.table().is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_add_to_report() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(MAINTAIN_PROVIDERS, PROVIDER_RESPONSE);

        let mut table = Table::default();
        for (name, id) in [("first", "1111.0"), ("second", "9999"), ("third", "2222")] {
            table.push_values(vec![
                ("name".to_string(), name.to_string()),
                ("provider_id".to_string(), id.to_string()),
            ]);
        }
        let mut report = ProviderReport::new(provider_connection(transport.clone()), table);
        report.add_to_report(&["npi", "last_name"], "provider_id").await.unwrap();

        let table = report.table();
        assert_eq!(
            table.columns(),
            &["provider_id", "provider_npi", "provider_last_name", "name"]
        );
        assert_eq!(table.rows()[0].get("provider_id"), "1111");
        assert_eq!(table.rows()[0].get("provider_npi"), "1234567890");
        assert_eq!(table.rows()[1].get("provider_last_name"), "");
        assert_eq!(table.rows()[2].get("provider_last_name"), "Jones");

        let request = &transport.requests()[0].1;
        assert!(request.contains("<emp_id>9999</emp_id>"));
    }

    #[tokio::test]
    async fn test_schedule_with_data() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(GET_SCHEDULE, SCHEDULE_RESPONSE);
        transport.respond(MAINTAIN_PROVIDERS, PROVIDER_RESPONSE);
        transport.respond(MAINTAIN_LOCATIONS, LOCATION_RESPONSE);

        let mut with_data = ScheduleWithData::new(
            schedule_connection(transport.clone()),
            provider_connection(transport.clone()),
            location_connection(transport.clone()),
        );
        with_data.save_schedule_from_range("2017-05-01", "2017-05-02").await.unwrap();

        let schedule_requests: Vec<String> = transport
            .requests()
            .into_iter()
            .filter(|(op, _)| op == GET_SCHEDULE)
            .map(|(_, xml)| xml)
            .collect();
        assert_eq!(schedule_requests.len(), 2);
        assert!(schedule_requests[0].contains("<include_provider_primary_key>true</include_provider_primary_key>"));

        let saved = with_data.saved_schedule().unwrap();
        for dropped in ["empid", "siteid", "providerprimarykey", "location", "@action", "is_scheduled", "zip"] {
            assert!(!saved.has_column(dropped), "{} should be dropped", dropped);
        }
        let first = &saved.rows()[0];
        assert_eq!(first.get("site_name"), "General Hospital");
        assert_eq!(first.get("site_short_name"), "GH");
        assert_eq!(first.get(PROVIDER_KEY), "1");
        assert_eq!(first.get("npi"), "1234567890");
        assert_eq!(with_data.schedule().saved_schedule(), Some(saved));

        // The open shift has no provider, so its provider cells stay empty
        let open = saved.rows().iter().find(|r| r.get("providername") == "open").unwrap();
        assert_eq!(open.get("npi"), "");
    }

    #[tokio::test]
    async fn test_provider_locations_join() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(MAINTAIN_LOCATIONS, LOCATION_RESPONSE);
        transport.enqueue(MAINTAIN_PROVIDERS, Ok(PROVIDER_RESPONSE.to_string()));
        transport.respond(MAINTAIN_PROVIDERS, SITE_PROVIDERS_RESPONSE);

        let locations = location_connection(transport.clone());
        let provider_locations = ProviderLocations::new(provider_connection(transport.clone()), &locations)
            .await
            .unwrap();
        assert_eq!(provider_locations.all_providers().len(), 2);

        let joined = provider_locations.join_all_locations_with_all_providers().await.unwrap();
        // One match per site: provider 1 is known, provider 3 is not
        assert_eq!(joined.len(), 2);
        assert!(joined.rows().iter().all(|r| r.get("last_name") == "Smith"));

        let calls = transport.call_count();
        provider_locations.all_location_provider_values().await.unwrap();
        provider_locations.location_provider_values("100").await.unwrap();
        assert_eq!(transport.call_count(), calls);
    }
}
