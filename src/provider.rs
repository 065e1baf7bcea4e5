// Provider service connection
use crate::settings::{Credentials, Service, Settings};
use crate::soap::{build_request, check_response, debug_xml, ApiError, HttpSoapTransport, SoapTransport};
use crate::xmlmanip::{inject_tags, ElementTag, Predicate, Record, Tags, XmlSchema};
use std::sync::Arc;
use tracing::debug;

pub const PROVIDER_TEMPLATE: &str = r#"<tangier version="1.0" method="provider.request"></tangier>"#;
pub const MAINTAIN_PROVIDERS: &str = "MaintainProviders";

pub const PRIMARY_KEY_LABEL: &str = "provider_primary_key";
pub const EMP_ID_LABEL: &str = "emp_id";

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub provider_ids: Vec<String>,
    // Treat ids as `provider_primary_key` rather than `emp_id`.
    pub use_primary_keys: bool,
    pub all_providers: bool,
    pub xml_string: Option<String>,
}

impl Default for ProviderQuery {
    fn default() -> Self {
        Self {
            provider_ids: Vec::new(),
            use_primary_keys: true,
            all_providers: true,
            xml_string: None,
        }
    }
}

impl ProviderQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_primary_keys(ids: Vec<String>) -> Self {
        Self {
            provider_ids: ids,
            all_providers: false,
            ..Default::default()
        }
    }

    pub fn by_emp_ids(ids: Vec<String>) -> Self {
        Self {
            provider_ids: ids,
            use_primary_keys: false,
            all_providers: false,
            ..Default::default()
        }
    }

    pub fn id_label(&self) -> &'static str {
        if self.use_primary_keys {
            PRIMARY_KEY_LABEL
        } else {
            EMP_ID_LABEL
        }
    }

    // Label present on every returned provider; the full listing is keyed by primary key.
    fn search_label(&self) -> &'static str {
        if self.all_providers {
            PRIMARY_KEY_LABEL
        } else {
            self.id_label()
        }
    }

    fn provider_tags(&self) -> Tags {
        let label = self.id_label();
        if self.all_providers {
            return Tags::new().with(
                "provider",
                ElementTag::new()
                    .attr("action", "info")
                    .inner(Tags::new().with(label, "ALL")),
            );
        }
        self.provider_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                (
                    format!("provider__{}", i),
                    ElementTag::new()
                        .attr("action", "info")
                        .inner(Tags::new().with(label, id)),
                )
            })
            .collect()
    }
}

pub struct ProviderConnection {
    transport: Arc<dyn SoapTransport>,
    base_xml: String,
    show_xml_request: bool,
    show_xml_response: bool,
}

impl ProviderConnection {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let transport = HttpSoapTransport::from_settings(settings, Service::Provider)?;
        Ok(Self::with_transport(Arc::new(transport), &settings.credentials(), None)?
            .with_debug(settings.debug, settings.debug))
    }

    pub fn with_transport(
        transport: Arc<dyn SoapTransport>,
        credentials: &Credentials,
        base_xml: Option<&str>,
    ) -> Result<Self, ApiError> {
        let base_xml = inject_tags(
            base_xml.unwrap_or(PROVIDER_TEMPLATE),
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

    // Send a fully formed provider request; error comments in the reply fail the call.
    pub async fn maintain_providers(&self, xml_string: &str) -> Result<String, ApiError> {
        debug_xml("MaintainProviders request", xml_string, self.show_xml_request);
        let response = self.transport.call(MAINTAIN_PROVIDERS, xml_string).await?;
        debug_xml("MaintainProviders response", &response, self.show_xml_response);
        check_response(&response)?;
        Ok(response)
    }

    pub async fn get_provider_info(&self, query: &ProviderQuery) -> Result<String, ApiError> {
        if query.provider_ids.is_empty() && !query.all_providers {
            return Err(ApiError::ApiCall(
                "You must provide either a list of provider_ids or set all_providers.".to_string(),
            ));
        }
        let template = query.xml_string.as_deref().unwrap_or(&self.base_xml);
        let xml_string = build_request(template, "providers", &query.provider_tags())?;
        debug!(
            count = query.provider_ids.len(),
            all = query.all_providers,
            label = query.id_label(),
            "Requesting provider info"
        );
        self.maintain_providers(&xml_string).await
    }

    /// One record per provider in the response.
    pub async fn provider_info_values_list(&self, query: &ProviderQuery) -> Result<Vec<Record>, ApiError> {
        let response = self.get_provider_info(query).await?;
        let schema = XmlSchema::parse(&response)?;
        Ok(schema.search(&Predicate::contains(query.search_label(), "")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::mock_transport::MockTransport;
    use crate::test_fixtures::PROVIDER_RESPONSE;
    use crate::xmlmanip::Element;

    fn connection(transport: Arc<MockTransport>) -> ProviderConnection {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        ProviderConnection::with_transport(transport, &credentials, None).unwrap()
    }

    #[test]
    fn test_admin_credentials() {
        let conn = connection(Arc::new(MockTransport::new()));
        assert_eq!(
            conn.base_xml(),
            r#"<tangier version="1.0" method="provider.request"><admin_user>admin</admin_user><admin_pwd>secret</admin_pwd></tangier>"#
        );
    }

    #[tokio::test]
    async fn test_all_providers_request() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(MAINTAIN_PROVIDERS, PROVIDER_RESPONSE);
        let conn = connection(transport.clone());

        conn.get_provider_info(&ProviderQuery::all()).await.unwrap();
        let request = Element::parse(&transport.requests()[0].1).unwrap();
        let providers = request.find("providers").unwrap();
        assert_eq!(providers.children.len(), 1);
        let provider = &providers.children[0];
        assert_eq!(provider.attr("action"), Some("info"));
        assert_eq!(provider.find("provider_primary_key").unwrap().text, "ALL");
    }

    #[tokio::test]
    async fn test_provider_per_emp_id() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(MAINTAIN_PROVIDERS, PROVIDER_RESPONSE);
        let conn = connection(transport.clone());

        let query = ProviderQuery::by_emp_ids(vec!["1111".to_string(), "2222".to_string()]);
        let values = conn.provider_info_values_list(&query).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].text("last_name"), Some("Jones"));
        assert_eq!(values[0].text("@action"), Some("info"));

        let request = Element::parse(&transport.requests()[0].1).unwrap();
        let ids: Vec<&str> = request
            .find("providers")
            .unwrap()
            .children
            .iter()
            .map(|p| p.find("emp_id").unwrap().text.as_str())
            .collect();
        assert_eq!(ids, vec!["1111", "2222"]);
    }

    #[tokio::test]
    async fn test_requires_ids_or_all() {
        let transport = Arc::new(MockTransport::new());
        let conn = connection(transport.clone());
        let query = ProviderQuery::by_primary_keys(Vec::new());
        assert!(matches!(
            conn.get_provider_info(&query).await,
            Err(ApiError::ApiCall(_))
        ));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            MAINTAIN_PROVIDERS,
            "<tangier><providers><provider><error>bad key</error></provider></providers></tangier>",
        );
        let conn = connection(transport);
        let err = conn.get_provider_info(&ProviderQuery::all()).await.unwrap_err();
        assert_eq!(err, ApiError::Api("bad key".to_string()));
    }
}
