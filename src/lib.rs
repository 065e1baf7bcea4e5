// Client library for the Tangier scheduling SOAP API

// Request building and response searching
pub mod xmlmanip;

// Configuration and transport
pub mod settings;
pub mod soap;

// Service connections
pub mod location;
pub mod provider;
pub mod schedule;

// Reports over the connections
pub mod async_schedule;
pub mod helpers;
pub mod report;
pub mod table;

#[cfg(test)]
mod test_fixtures;

// Re-export key types for convenience
pub use async_schedule::{AsyncScheduleConnection, IndexedResponse, ScheduleRequest};
pub use location::{LocationConnection, LocationFields};
pub use provider::{ProviderConnection, ProviderQuery};
pub use report::{ProviderLocations, ProviderReport, ScheduleManipulation, ScheduleWithData, ShiftMatch};
pub use schedule::{ScheduleConnection, ScheduleQuery, ScheduleTarget};
pub use settings::{ConfigError, Credentials, Service, Settings};
pub use soap::{ApiError, HttpSoapTransport, SoapTransport};
pub use table::{Join, Row, Table};
pub use xmlmanip::{
    inject_tags, search_schema, ElementTag, Predicate, Record, TagValue, Tags, XmlError, XmlSchema,
    XmlValue,
};
