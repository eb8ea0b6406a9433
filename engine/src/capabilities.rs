//! Capabilities resolver (C4): parse WMS/WMTS GetCapabilities XML to pick a
//! CRS, with a process-wide memoized cache and a safe fallback on any
//! failure (spec.md §4.4 — this component never aborts a run).

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitiesResult {
    pub supported_crs: Vec<String>,
    pub default: String,
    pub source: &'static str,
}

fn fallback() -> CapabilitiesResult {
    CapabilitiesResult {
        supported_crs: vec!["EPSG:3857".to_string(), "EPSG:4326".to_string()],
        default: "EPSG:3857".to_string(),
        source: "assumed",
    }
}

type CacheKey = (Option<String>, String);

fn cache() -> &'static Mutex<HashMap<CacheKey, CapabilitiesResult>> {
    static CACHE: OnceLock<Mutex<HashMap<CacheKey, CapabilitiesResult>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// `hint` disambiguates WMS vs WMTS parsing when the URL's query string
/// doesn't already say. Memoized by `(hint, url)` for the process lifetime
/// — no eviction.
pub async fn get_supported_crs(
    client: &reqwest::Client,
    capabilities_url: &str,
    hint: Option<&str>,
) -> CapabilitiesResult {
    let key = (hint.map(str::to_string), capabilities_url.to_string());
    {
        let cached = cache().lock().await;
        if let Some(result) = cached.get(&key) {
            return result.clone();
        }
    }

    let result = resolve(client, capabilities_url, hint).await.unwrap_or_else(|| fallback());

    cache().lock().await.insert(key, result.clone());
    result
}

async fn resolve(client: &reqwest::Client, url: &str, hint: Option<&str>) -> Option<CapabilitiesResult> {
    let body = client.get(url).send().await.ok()?.text().await.ok()?;

    let detected = hint.map(str::to_ascii_uppercase).unwrap_or_else(|| detect_service_type(url));

    let crs_list = match detected.as_str() {
        "WMTS" => parse_wmts(&body).or_else(|| parse_wms(&body)),
        _ => parse_wms(&body).or_else(|| parse_wmts(&body)),
    }?;

    if crs_list.is_empty() {
        return None;
    }

    let default = pick_default(&crs_list);
    Some(CapabilitiesResult {
        supported_crs: crs_list,
        default,
        source: "capabilities",
    })
}

fn detect_service_type(url: &str) -> String {
    let upper = url.to_ascii_uppercase();
    if upper.contains("WMTS") {
        "WMTS".to_string()
    } else {
        "WMS".to_string()
    }
}

fn pick_default(crs_list: &[String]) -> String {
    if crs_list.iter().any(|c| c == "EPSG:3857") {
        "EPSG:3857".to_string()
    } else if crs_list.iter().any(|c| c == "EPSG:4326") {
        "EPSG:4326".to_string()
    } else {
        crs_list[0].clone()
    }
}

/// Normalizes any EPSG identifier spelling (`EPSG:3857`,
/// `urn:ogc:def:crs:EPSG::3857`, `urn:ogc:def:crs:EPSG:6.3:3857`, ...) into
/// `EPSG:<code>` by taking the last contiguous run of digits.
fn normalize_epsg(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !raw.to_ascii_uppercase().contains("EPSG") && !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut last_digits: Option<&str> = None;
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            last_digits = Some(&raw[start..i]);
        } else {
            i += 1;
        }
    }
    last_digits.map(|code| format!("EPSG:{code}"))
}

/// Parses WMS 1.1.1 (`<SRS>`) and 1.3.0 (`<CRS>`) capabilities documents.
fn parse_wms(body: &str) -> Option<Vec<String>> {
    collect_tag_text(body, &["SRS", "CRS"])
}

/// Parses WMTS 1.0.0 `TileMatrixSet/SupportedCRS`.
fn parse_wmts(body: &str) -> Option<Vec<String>> {
    collect_tag_text(body, &["SupportedCRS"])
}

fn collect_tag_text(body: &str, local_names: &[&str]) -> Option<Vec<String>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut capturing = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                capturing = tag_matches(e.name().as_ref(), local_names);
            }
            Ok(Event::Text(t)) if capturing => {
                if let Ok(text) = t.decode() {
                    if let Some(normalized) = normalize_epsg(&text) {
                        out.push(normalized);
                    }
                }
            }
            Ok(Event::End(_)) => {
                capturing = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => return if out.is_empty() { None } else { Some(dedup(out)) },
            _ => {}
        }
        buf.clear();
    }

    if out.is_empty() {
        None
    } else {
        Some(dedup(out))
    }
}

fn tag_matches(qname: &[u8], local_names: &[&str]) -> bool {
    let qname = String::from_utf8_lossy(qname);
    let local = qname.rsplit(':').next().unwrap_or(&qname);
    local_names.iter().any(|n| n.eq_ignore_ascii_case(local))
}

fn dedup(mut v: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    v.retain(|x| seen.insert(x.clone()));
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_epsg_code() {
        assert_eq!(normalize_epsg("EPSG:3857"), Some("EPSG:3857".to_string()));
    }

    #[test]
    fn normalizes_urn_form() {
        assert_eq!(normalize_epsg("urn:ogc:def:crs:EPSG::3857"), Some("EPSG:3857".to_string()));
    }

    #[test]
    fn normalizes_versioned_urn_form() {
        assert_eq!(normalize_epsg("urn:ogc:def:crs:EPSG:6.3:4326"), Some("EPSG:4326".to_string()));
    }

    #[test]
    fn parses_wms_1_3_0_crs_tags() {
        let body = r#"<WMS_Capabilities><Layer><CRS>EPSG:3857</CRS><CRS>EPSG:4326</CRS></Layer></WMS_Capabilities>"#;
        let list = parse_wms(body).unwrap();
        assert_eq!(list, vec!["EPSG:3857".to_string(), "EPSG:4326".to_string()]);
    }

    #[test]
    fn parses_wms_1_1_1_srs_tags() {
        let body = r#"<WMT_MS_Capabilities><Layer><SRS>EPSG:4326</SRS></Layer></WMT_MS_Capabilities>"#;
        let list = parse_wms(body).unwrap();
        assert_eq!(list, vec!["EPSG:4326".to_string()]);
    }

    #[test]
    fn parses_wmts_supported_crs() {
        let body = r#"<Capabilities><Contents><TileMatrixSet><ows:SupportedCRS>urn:ogc:def:crs:EPSG::3857</ows:SupportedCRS></TileMatrixSet></Contents></Capabilities>"#;
        let list = parse_wmts(body).unwrap();
        assert_eq!(list, vec!["EPSG:3857".to_string()]);
    }

    #[test]
    fn default_prefers_3857_then_4326_then_first() {
        assert_eq!(pick_default(&["EPSG:4326".into(), "EPSG:3857".into()]), "EPSG:3857");
        assert_eq!(pick_default(&["EPSG:4326".into()]), "EPSG:4326");
        assert_eq!(pick_default(&["EPSG:2154".into()]), "EPSG:2154");
    }

    #[tokio::test]
    async fn malformed_document_falls_back() {
        let client = reqwest::Client::new();
        let result = resolve(&client, "not a real url at all", None).await;
        assert!(result.is_none());
    }
}
