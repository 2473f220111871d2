//! Rendering `server.xml.j2` and `seraph-config.xml.j2`.

use std::path::PathBuf;

use bamboo_entrypoint::env::Environment;
use bamboo_entrypoint::template::Renderer;

fn renderer() -> Renderer {
    Renderer::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates"))
}

fn render(name: &str, vars: &[(&str, &str)]) -> String {
    let env = Environment::from_vars(vars.iter().copied());
    match renderer().render(name, &env) {
        Ok(out) => out,
        Err(err) => panic!("{name} should render: {err}"),
    }
}

fn parse(xml: &str) -> roxmltree::Document<'_> {
    match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(err) => panic!("rendered XML should parse: {err}\n{xml}"),
    }
}

fn attr<'a>(doc: &'a roxmltree::Document<'_>, element: &str, name: &str) -> Option<&'a str> {
    doc.descendants()
        .find(|n| n.has_tag_name(element))
        .and_then(|n| n.attribute(name))
}

#[test]
fn server_xml_defaults() {
    let xml = render("server.xml.j2", &[]);
    let doc = parse(&xml);
    assert_eq!(attr(&doc, "Connector", "port"), Some("8085"));
    assert_eq!(attr(&doc, "Connector", "scheme"), Some("http"));
    assert_eq!(attr(&doc, "Connector", "secure"), Some("false"));
    assert_eq!(attr(&doc, "Context", "path"), Some(""));
    assert_eq!(attr(&doc, "Server", "port"), Some("8007"));
    assert!(!xml.contains("RemoteIpValve"));
}

#[test]
fn server_xml_uses_atl_settings() {
    let xml = render(
        "server.xml.j2",
        &[
            ("ATL_TOMCAT_PORT", "9095"),
            ("ATL_TOMCAT_CONTEXTPATH", "/mybamboo"),
            ("ATL_PROXY_NAME", "bamboo.example.com"),
            ("ATL_PROXY_PORT", "443"),
            ("ATL_TOMCAT_SCHEME", "https"),
            ("ATL_TOMCAT_SECURE", "true"),
        ],
    );
    let doc = parse(&xml);
    assert_eq!(attr(&doc, "Connector", "port"), Some("9095"));
    assert_eq!(attr(&doc, "Context", "path"), Some("/mybamboo"));
    assert_eq!(attr(&doc, "Connector", "proxyName"), Some("bamboo.example.com"));
    assert_eq!(attr(&doc, "Connector", "proxyPort"), Some("443"));
    assert_eq!(attr(&doc, "Connector", "scheme"), Some("https"));
    assert_eq!(attr(&doc, "Connector", "secure"), Some("true"));
}

#[test]
fn server_xml_falls_back_to_catalina_variables() {
    let xml = render(
        "server.xml.j2",
        &[
            ("CATALINA_CONNECTOR_PROXYNAME", "legacy.example.com"),
            ("CATALINA_CONNECTOR_SCHEME", "https"),
            ("CATALINA_CONTEXT_PATH", "/legacy"),
        ],
    );
    let doc = parse(&xml);
    assert_eq!(attr(&doc, "Connector", "proxyName"), Some("legacy.example.com"));
    assert_eq!(attr(&doc, "Connector", "scheme"), Some("https"));
    assert_eq!(attr(&doc, "Context", "path"), Some("/legacy"));
}

#[test]
fn atl_variables_win_over_catalina_ones() {
    let xml = render(
        "server.xml.j2",
        &[
            ("ATL_PROXY_NAME", "new.example.com"),
            ("CATALINA_CONNECTOR_PROXYNAME", "legacy.example.com"),
        ],
    );
    let doc = parse(&xml);
    assert_eq!(attr(&doc, "Connector", "proxyName"), Some("new.example.com"));
}

#[test]
fn remote_ip_valve_gets_escaped_proxies() {
    let xml = render(
        "server.xml.j2",
        &[("ATL_TOMCAT_TRUSTEDPROXIES", "\"10.0.0.1|10.0.0.2\"")],
    );
    let doc = parse(&xml);
    let valve = doc
        .descendants()
        .find(|n| n.attribute("className") == Some("org.apache.catalina.valves.RemoteIpValve"))
        .expect("RemoteIpValve should be rendered");
    assert_eq!(valve.attribute("trustedProxies"), Some(r"10\.0\.0\.1|10\.0\.0\.2"));
    assert_eq!(valve.attribute("internalProxies"), None);
}

#[test]
fn hostile_values_cannot_break_the_document() {
    let xml = render(
        "server.xml.j2",
        &[("ATL_PROXY_NAME", "evil\"/><Injected a=\"1")],
    );
    let doc = parse(&xml);
    assert_eq!(
        attr(&doc, "Connector", "proxyName"),
        Some("evil\"/><Injected a=\"1")
    );
    assert!(!doc.descendants().any(|n| n.has_tag_name("Injected")));
}

#[test]
fn seraph_autologin_only_when_set() {
    let without = render("seraph-config.xml.j2", &[]);
    parse(&without);
    assert!(!without.contains("autologin.cookie.age"));

    let with = render("seraph-config.xml.j2", &[("ATL_AUTOLOGIN_COOKIE_AGE", "1209600")]);
    parse(&with);
    assert!(with.contains("<param-value>1209600</param-value>"));
}
