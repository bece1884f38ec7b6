use std::sync::Arc;

use axum::response::Html;

use crate::config::DashboardConfig;

const TEMPLATE: &str = include_str!("../assets/dashboard.html");
const API_BASE_SLOT: &str = "__API_BASE__";
const REFRESH_MS_SLOT: &str = "__REFRESH_MS__";

/// The dashboard page, rendered once at startup with its runtime settings.
#[derive(Clone, Debug)]
pub struct Dashboard {
    page: Arc<str>,
}

impl Dashboard {
    pub fn new(config: &DashboardConfig) -> Self {
        let page = TEMPLATE
            .replace(API_BASE_SLOT, &js_string(&config.api_base))
            .replace(REFRESH_MS_SLOT, &config.refresh.as_millis().to_string());
        Self { page: page.into() }
    }

    pub fn page(&self) -> Html<String> {
        Html(self.page.to_string())
    }
}

// JSON string literal that is also safe inside a <script> element.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned())
        .to_string()
        .replace("</", "<\\/")
}

#[test]
pub fn test_settings_are_injected() {
    let dashboard = Dashboard::new(&DashboardConfig {
        api_base: "http://relay.local:8080".to_string(),
        refresh: std::time::Duration::from_secs(30),
    });
    let Html(page) = dashboard.page();
    assert!(page.contains(r#"const API_BASE = "http://relay.local:8080";"#));
    assert!(page.contains("const REFRESH_MS = 30000;"));
    assert!(!page.contains(API_BASE_SLOT));
    assert!(!page.contains(REFRESH_MS_SLOT));
}

#[test]
pub fn test_api_base_cannot_close_the_script() {
    assert_eq!(js_string("</script>"), r#""<\/script>""#);
}
