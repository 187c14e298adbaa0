//! Command/template rendering.
//!
//! Templates use Tera `{{ name }}` placeholders. Go-style bodies
//! (`{{.Name}}`, `{{range}}`, `{{if}}`) are converted first. Rendering is
//! all-or-nothing: a missing parameter is reported before Tera runs, so no
//! partially substituted text ever leaves this module.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex_lite::Regex;
use tera::{Context, Tera};

use crate::db::Store;
use crate::models::{Device, Template};
use crate::utils::static_regex;

pub type Params = HashMap<String, serde_json::Value>;

/// Names every dispatch supplies from the target device
pub const DEVICE_VARIABLES: &[&str] = &["hostname", "management_address", "port", "platform"];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("missing parameter: {0}")]
    MissingParameter(String),
    #[error("command is empty")]
    EmptyCommand,
    #[error("template error: {0}")]
    Template(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RenderError {
    /// Whether the caller (not the service) is at fault
    pub fn is_client_error(&self) -> bool {
        !matches!(self, RenderError::Store(_))
    }
}

/// Convert Go template syntax to Tera.
/// Tera bodies (no leading-dot variables, no trim markers) pass through untouched.
static TAG: OnceLock<Option<Regex>> = OnceLock::new();
static RANGE_KV: OnceLock<Option<Regex>> = OnceLock::new();
static RANGE: OnceLock<Option<Regex>> = OnceLock::new();
static IF_EQ: OnceLock<Option<Regex>> = OnceLock::new();
static IF_PLAIN: OnceLock<Option<Regex>> = OnceLock::new();
static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
static BOUND_FOR: OnceLock<Option<Regex>> = OnceLock::new();
static BOUND_SET: OnceLock<Option<Regex>> = OnceLock::new();

fn tag_regex() -> Option<&'static Regex> {
    static_regex(&TAG, r"\{\{-?\s*(.*?)\s*-?\}\}")
}

pub fn convert_go_template_to_tera(body: &str) -> String {
    let Some(tag) = tag_regex() else {
        return body.to_string();
    };
    let is_go = body.contains("{{-")
        || tag.captures_iter(body).any(|c| {
            let inner = c.get(1).map_or("", |m| m.as_str());
            inner.starts_with(['.', '$'])
                || matches!(inner, "end" | "else")
                || inner.starts_with("range ")
                || inner.starts_with("if ")
        });
    if !is_go {
        return body.to_string();
    }

    let (Some(range_kv), Some(range), Some(if_eq), Some(if_plain)) = (
        static_regex(&RANGE_KV, r"^range\s+\$\w+\s*,\s*\$(\w+)\s*:=\s*\.(\w+)$"),
        static_regex(&RANGE, r"^range\s+\.(\w+)$"),
        static_regex(&IF_EQ, r#"^if\s+eq\s+\.(\w+)\s+"([^"]*)"$"#),
        static_regex(&IF_PLAIN, r"^if\s+\.(\w+)$"),
    ) else {
        return body.to_string();
    };

    // Open blocks, innermost last, so `end` closes the right one
    let mut open_blocks: Vec<&'static str> = Vec::new();
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for caps in tag.captures_iter(body) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let inner = caps.get(1).map_or("", |m| m.as_str());
        out.push_str(&body[last..whole.start]);
        last = whole.end;

        let converted = if let Some(c) = range_kv.captures(inner) {
            open_blocks.push("endfor");
            format!("{{% for {} in {} %}}", &c[1], &c[2])
        } else if let Some(c) = range.captures(inner) {
            open_blocks.push("endfor");
            format!("{{% for item in {} %}}", &c[1])
        } else if let Some(c) = if_eq.captures(inner) {
            open_blocks.push("endif");
            format!("{{% if {} == \"{}\" %}}", &c[1], &c[2])
        } else if let Some(c) = if_plain.captures(inner) {
            open_blocks.push("endif");
            format!("{{% if {} %}}", &c[1])
        } else if inner == "else" {
            "{% else %}".to_string()
        } else if inner == "end" {
            format!("{{% {} %}}", open_blocks.pop().unwrap_or("endif"))
        } else {
            format!("{{{{ {} }}}}", inner.trim_start_matches(['.', '$']))
        };
        out.push_str(&converted);
    }
    out.push_str(&body[last..]);
    out
}

/// Placeholders a body needs from the caller, in order of first appearance.
///
/// Names bound by `{% for %}` / `{% set %}`, the `loop` helper, and
/// expressions guarded by a `default(...)` filter are not required.
pub fn required_placeholders(body: &str) -> Vec<String> {
    let (Some(expr), Some(ident), Some(bound_for), Some(bound_set)) = (
        tag_regex(),
        static_regex(&IDENT, r"^\.?([A-Za-z_][A-Za-z0-9_]*)"),
        static_regex(&BOUND_FOR, r"\{%-?\s*for\s+([A-Za-z_]\w*)(?:\s*,\s*([A-Za-z_]\w*))?\s+in\b"),
        static_regex(&BOUND_SET, r"\{%-?\s*set(?:_global)?\s+([A-Za-z_]\w*)\s*="),
    ) else {
        return Vec::new();
    };

    let mut bound: HashSet<&str> = HashSet::from(["loop"]);
    for caps in bound_for.captures_iter(body) {
        bound.extend(caps.iter().skip(1).flatten().map(|m| m.as_str()));
    }
    for caps in bound_set.captures_iter(body) {
        bound.extend(caps.get(1).map(|m| m.as_str()));
    }

    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for caps in expr.captures_iter(body) {
        let inner = caps.get(1).map_or("", |m| m.as_str());
        if inner.contains("default(") {
            continue;
        }
        let Some(name) = ident.captures(inner).and_then(|c| c.get(1)).map(|m| m.as_str()) else {
            continue;
        };
        if bound.contains(name) || matches!(name, "true" | "false" | "none") {
            continue;
        }
        if seen.insert(name) {
            names.push(name.to_string());
        }
    }
    names
}

/// First required placeholder for which `supplied` returns false
pub fn first_missing<F>(body: &str, supplied: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    required_placeholders(body).into_iter().find(|name| !supplied(name))
}

/// A value counts as supplied unless it is absent or JSON null
pub fn param_supplied(params: &Params, name: &str) -> bool {
    params.get(name).is_some_and(|v| !v.is_null())
}

/// Render a (Tera or Go-style) body against `params`
pub fn render_body(body: &str, params: &Params) -> Result<String, RenderError> {
    let body = convert_go_template_to_tera(body);
    if let Some(name) = first_missing(&body, |n| param_supplied(params, n)) {
        return Err(RenderError::MissingParameter(name));
    }

    let mut context = Context::new();
    for (key, value) in params {
        context.insert(key.as_str(), value);
    }

    Tera::one_off(&body, &context, false).map_err(|e| {
        let detail = std::error::Error::source(&e)
            .map(|s| s.to_string())
            .unwrap_or_else(|| e.to_string());
        RenderError::Template(detail)
    })
}

/// Parse a body without rendering it
pub fn check_syntax(body: &str) -> Result<(), RenderError> {
    let mut tera = Tera::default();
    tera.add_raw_template("check", &convert_go_template_to_tera(body))
        .map(|_| ())
        .map_err(|e| {
            let detail = std::error::Error::source(&e)
                .map(|s| s.to_string())
                .unwrap_or_else(|| e.to_string());
            RenderError::Template(detail)
        })
}

/// Render context for one device: its connection fields, then caller params on top
pub fn device_context(device: &Device, params: &Params) -> Params {
    let mut ctx: Params = HashMap::from([
        ("hostname".to_string(), serde_json::json!(device.hostname)),
        ("management_address".to_string(), serde_json::json!(device.management_address)),
        ("port".to_string(), serde_json::json!(device.port)),
        ("platform".to_string(), serde_json::json!(device.platform)),
    ]);
    for (key, value) in params {
        if !value.is_null() {
            ctx.insert(key.clone(), value.clone());
        }
    }
    ctx
}

/// Catalog-backed renderer
#[derive(Clone)]
pub struct Renderer {
    store: Store,
}

impl Renderer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn load(&self, name: &str) -> Result<Template, RenderError> {
        self.store
            .get_template(name)
            .await?
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))
    }

    /// Render a catalog template with exactly the given parameters
    pub async fn render(&self, name: &str, params: &Params) -> Result<String, RenderError> {
        let template = self.load(name).await?;
        render_body(&template.body, params)
    }

    /// Check a template for a dispatch whose device fields will be supplied per job
    pub async fn check_for_dispatch(&self, name: &str, params: &Params) -> Result<Template, RenderError> {
        let template = self.load(name).await?;
        let body = convert_go_template_to_tera(&template.body);
        let missing = first_missing(&body, |n| DEVICE_VARIABLES.contains(&n) || param_supplied(params, n));
        match missing {
            Some(name) => Err(RenderError::MissingParameter(name)),
            None => Ok(template),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_store;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_interface_basic_renders_supplied_values() {
        let (store, _dir) = temp_store().await;
        let renderer = Renderer::new(store);

        let out = renderer
            .render(
                "interface_basic",
                &params(&[("ip_address", json!("10.0.0.1")), ("subnet_mask", json!("255.255.255.0"))]),
            )
            .await
            .unwrap();
        assert!(out.contains("10.0.0.1"));
        assert!(out.contains("255.255.255.0"));
        assert!(!out.contains("{{"));
        assert!(!out.contains("}}"));
    }

    #[tokio::test]
    async fn test_missing_parameter_is_reported_by_name() {
        let (store, _dir) = temp_store().await;
        let renderer = Renderer::new(store);

        let err = renderer
            .render("interface_basic", &params(&[("subnet_mask", json!("255.255.255.0"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingParameter(ref n) if n == "ip_address"));

        // Null counts as absent
        let err = renderer
            .render(
                "interface_basic",
                &params(&[("ip_address", json!(null)), ("subnet_mask", json!("255.255.255.0"))]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingParameter(ref n) if n == "ip_address"));
    }

    #[tokio::test]
    async fn test_unknown_template() {
        let (store, _dir) = temp_store().await;
        let err = Renderer::new(store).render("nope", &Params::new()).await.unwrap_err();
        assert!(matches!(err, RenderError::UnknownTemplate(ref n) if n == "nope"));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_dispatch_check_counts_device_variables() {
        let (store, _dir) = temp_store().await;
        let renderer = Renderer::new(store);

        // banner_motd needs `hostname`, which each job gets from its device
        assert!(renderer
            .check_for_dispatch("banner_motd", &params(&[("message", json!("Authorized only"))]))
            .await
            .is_ok());
        let err = renderer.check_for_dispatch("banner_motd", &Params::new()).await.unwrap_err();
        assert!(matches!(err, RenderError::MissingParameter(ref n) if n == "message"));
    }

    #[test]
    fn test_loop_and_set_names_are_not_required() {
        let body = "{% set mtu = 9000 %}{% for port in ports %}interface {{ port }}\n mtu {{ mtu }}\n{{ loop.index }}{% endfor %}vlan {{ vlan_id }}";
        assert_eq!(required_placeholders(body), vec!["vlan_id"]);
    }

    #[test]
    fn test_placeholders_in_order_of_appearance() {
        let body = "ip route {{ prefix }} {{ mask }} {{ next_hop }}\n! {{ prefix | upper }}";
        assert_eq!(required_placeholders(body), vec!["prefix", "mask", "next_hop"]);
        assert_eq!(
            first_missing(body, |n| n == "prefix").as_deref(),
            Some("mask")
        );
    }

    #[test]
    fn test_tag_regex_is_shared_across_calls() {
        let body = "interface {{ interface }}";
        assert_eq!(required_placeholders(body), required_placeholders(body));
        assert!(std::ptr::eq(tag_regex().unwrap(), tag_regex().unwrap()));
    }

    #[test]
    fn test_vlan_template_with_ports() {
        let body = "vlan {{ vlan_id }}\n name {{ vlan_name }}\n{% if ports is defined %}{% for port in ports %}interface {{ port }}\n{% endfor %}{% endif %}";
        let out = render_body(
            body,
            &params(&[
                ("vlan_id", json!(10)),
                ("vlan_name", json!("users")),
                ("ports", json!(["Gi0/1", "Gi0/2"])),
            ]),
        )
        .unwrap();
        assert_eq!(out, "vlan 10\n name users\ninterface Gi0/1\ninterface Gi0/2\n");
    }

    #[test]
    fn test_device_context_params_override() {
        let device = Device {
            id: 7,
            hostname: "R15".to_string(),
            management_address: "172.16.39.102".to_string(),
            port: 32783,
            platform: "ios".to_string(),
            credential_profile: None,
            status: "unknown".to_string(),
            last_seen: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let ctx = device_context(&device, &params(&[("hostname", json!("edge-r15")), ("x", json!(null))]));
        assert_eq!(ctx["hostname"], json!("edge-r15"));
        assert_eq!(ctx["port"], json!(32783));
        assert!(!ctx.contains_key("x"));
    }

    #[test]
    fn test_go_template_variables() {
        assert_eq!(
            convert_go_template_to_tera("hostname {{.Hostname}}\nip {{ .IP }}"),
            "hostname {{ Hostname }}\nip {{ IP }}"
        );
        let tera = "hostname {{ Hostname }}";
        assert_eq!(convert_go_template_to_tera(tera), tera);
    }

    #[test]
    fn test_go_template_blocks() {
        assert_eq!(
            convert_go_template_to_tera("{{if .Vendor}}v{{else}}none{{end}}"),
            "{% if Vendor %}v{% else %}none{% endif %}"
        );
        assert_eq!(
            convert_go_template_to_tera("{{range .Items}}{{if eq .Role \"spine\"}}s{{end}}{{end}}"),
            "{% for item in Items %}{% if Role == \"spine\" %}s{% endif %}{% endfor %}"
        );
        assert_eq!(
            convert_go_template_to_tera("{{- range $i, $p := .Ports }}{{ $p }}{{- end }}"),
            "{% for p in Ports %}{{ p }}{% endfor %}"
        );
    }

    #[test]
    fn test_go_template_renders() {
        let out = render_body(
            "hostname {{.Hostname}}",
            &params(&[("Hostname", json!("R16"))]),
        )
        .unwrap();
        assert_eq!(out, "hostname R16");
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax("interface {{ name }}").is_ok());
        assert!(check_syntax("{{if .Vendor}}v{{end}}").is_ok());
        assert!(matches!(check_syntax("{% for x in xs %}"), Err(RenderError::Template(_))));
    }
}
