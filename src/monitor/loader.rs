//! Loads monitor definitions from a JSON file.
//!
//! Each entry describes the request and an `expect` block which is compiled into a
//! validator closure. `${VAR}` references in header values and body strings are
//! resolved from the environment when the file is loaded.

use super::{validate_monitor_set, Method, Monitor, MonitorError, ProbeResponse, Validation};

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// One entry of the monitor file. Durations are in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MonitorDefinition {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// A string is sent verbatim, anything else as JSON.
    pub body: Option<serde_json::Value>,
    pub timeout: Option<u64>,
    pub degraded_threshold: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u64>,
    #[serde(default)]
    pub expect: Expectation,
}

/// Declarative response checks, all of which must pass.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Expectation {
    /// Exact status code. Any 2xx is accepted when absent.
    pub status: Option<u16>,
    pub body_contains: Option<String>,
    pub body_matches: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Read and validate the monitor file at `path`.
pub fn load_monitors<P: AsRef<Path>>(path: P) -> Result<Vec<Monitor>, MonitorError> {
    let raw = std::fs::read_to_string(path)?;
    parse_monitors(&raw, |var| std::env::var(var).ok())
}

/// Parse monitor definitions, resolving `${VAR}` references through `lookup`.
pub fn parse_monitors(
    raw: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<Monitor>, MonitorError> {
    let definitions: Vec<MonitorDefinition> = serde_json::from_str(raw)?;
    let monitors = definitions
        .into_iter()
        .map(|def| def.into_monitor(&lookup))
        .collect::<Result<Vec<_>, _>>()?;
    validate_monitor_set(&monitors)?;
    Ok(monitors)
}

impl MonitorDefinition {
    fn into_monitor(self, lookup: &impl Fn(&str) -> Option<String>) -> Result<Monitor, MonitorError> {
        let validator = self.expect.compile(&self.name)?;
        let mut builder = Monitor::builder(self.name.clone(), self.url)
            .method(self.method)
            .validator(validator);

        for (key, value) in &self.headers {
            builder = builder.header(key.clone(), expand_env(value, &self.name, lookup)?);
        }

        match self.body {
            Some(serde_json::Value::String(text)) => {
                builder = builder.text_body(expand_env(&text, &self.name, lookup)?);
            }
            Some(value) => {
                builder = builder.json_body(expand_json(value, &self.name, lookup)?);
            }
            None => {}
        }

        if let Some(ms) = self.timeout {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.degraded_threshold {
            builder = builder.degraded_threshold(Duration::from_millis(ms));
        }
        if let Some(retries) = self.max_retries {
            builder = builder.max_retries(retries);
        }
        if let Some(ms) = self.retry_delay {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }

        builder.build()
    }
}

impl Expectation {
    /// Compile the checks into a validator closure.
    pub fn compile(
        &self,
        monitor: &str,
    ) -> Result<impl Fn(&ProbeResponse) -> Validation + Send + Sync + 'static, MonitorError> {
        let pattern = match &self.body_matches {
            Some(p) => Some(Regex::new(p).map_err(|e| MonitorError::InvalidPattern {
                monitor: monitor.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };
        let expect = self.clone();

        Ok(move |resp: &ProbeResponse| {
            match expect.status {
                Some(code) if resp.status != code => {
                    return Validation::failure(format!("Status code is not {}", code));
                }
                None if !(200..300).contains(&resp.status) => {
                    return Validation::failure(format!("Status code {} is not 2xx", resp.status));
                }
                _ => {}
            }

            for (name, expected) in &expect.headers {
                let actual = resp.headers.get(name.as_str()).and_then(|v| v.to_str().ok());
                if actual != Some(expected.as_str()) {
                    return Validation::failure(format!(
                        "Header {} is {:?}, expected {:?}",
                        name, actual, expected
                    ));
                }
            }

            if let Some(needle) = &expect.body_contains {
                if !resp.body.contains(needle.as_str()) {
                    return Validation::failure(format!("Body does not contain {:?}", needle));
                }
            }

            if let Some(re) = &pattern {
                if !re.is_match(&resp.body) {
                    return Validation::failure(format!("Body does not match /{}/", re.as_str()));
                }
            }

            Validation::Success
        })
    }
}

fn env_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern"))
}

/// Replace every `${VAR}` in `input`; an unset variable is an error.
fn expand_env(
    input: &str,
    monitor: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<String, MonitorError> {
    let re = env_reference();
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in re.captures_iter(input) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let var = &caps[1];
        let value = lookup(var).ok_or_else(|| MonitorError::MissingEnv {
            monitor: monitor.to_string(),
            var: var.to_string(),
        })?;
        out.push_str(&input[last..whole.start]);
        out.push_str(&value);
        last = whole.end;
    }
    out.push_str(&input[last..]);

    Ok(out)
}

fn expand_json(
    value: serde_json::Value,
    monitor: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<serde_json::Value, MonitorError> {
    use serde_json::Value;

    Ok(match value {
        Value::String(s) => Value::String(expand_env(&s, monitor, lookup)?),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| expand_json(v, monitor, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, expand_json(v, monitor, lookup)?)))
                .collect::<Result<_, MonitorError>>()?,
        ),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Body;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn response(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse {
            status,
            body: body.to_string(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_parse_applies_defaults_and_overrides() {
        let raw = r#"[
            { "name": "Website", "url": "https://example.com", "timeout": 5000,
              "degradedThreshold": 3000, "expect": { "status": 200 } },
            { "name": "Event", "url": "https://api.example.com/event", "method": "PUT",
              "body": { "eventType": "open" }, "maxRetries": 0, "retryDelay": 250,
              "expect": { "status": 201 } }
        ]"#;

        let monitors = parse_monitors(raw, no_env).unwrap();
        assert_eq!(monitors.len(), 2);

        let web = &monitors[0];
        assert_eq!(web.method, Method::Get);
        assert_eq!(web.timeout, Duration::from_secs(5));
        assert_eq!(web.degraded_threshold, Some(Duration::from_secs(3)));
        assert_eq!(web.max_retries, 2);
        assert_eq!(web.validate(&response(200, "")), Validation::Success);
        assert_eq!(
            web.validate(&response(503, "")),
            Validation::failure("Status code is not 200")
        );

        let event = &monitors[1];
        assert_eq!(event.method, Method::Put);
        assert_eq!(event.max_retries, 0);
        assert_eq!(event.retry_delay, Duration::from_millis(250));
        assert_eq!(event.body, Some(Body::Json(serde_json::json!({ "eventType": "open" }))));
        assert_ne!(event.validate(&response(200, "")), Validation::Success);
    }

    #[test]
    fn test_env_references_are_expanded() {
        let raw = r#"[{
            "name": "Prediction", "url": "https://api.example.com", "method": "POST",
            "headers": { "Authorization": "Bearer ${HC_TOKEN}" },
            "body": { "nested": ["${HC_TOKEN}", 1] }
        }]"#;
        let lookup = |var: &str| (var == "HC_TOKEN").then(|| "s3cr3t".to_string());

        let monitors = parse_monitors(raw, lookup).unwrap();
        let m = &monitors[0];
        assert_eq!(
            m.headers.get("authorization"),
            Some(&HeaderValue::from_static("Bearer s3cr3t"))
        );
        assert_eq!(
            m.body,
            Some(Body::Json(serde_json::json!({ "nested": ["s3cr3t", 1] })))
        );
    }

    #[test]
    fn test_missing_env_is_an_error() {
        let raw = r#"[{ "name": "x", "url": "https://example.com",
                       "headers": { "Authorization": "Bearer ${NOPE}" } }]"#;
        assert!(matches!(
            parse_monitors(raw, no_env),
            Err(MonitorError::MissingEnv { var, .. }) if var == "NOPE"
        ));
    }

    #[test]
    fn test_text_body_and_body_checks() {
        let raw = r#"[{ "name": "health", "url": "https://example.com/health",
                       "method": "POST", "body": "ping",
                       "expect": { "bodyContains": "\"status\"", "bodyMatches": "\"status\":\\s*\"up\"" } }]"#;
        let monitors = parse_monitors(raw, no_env).unwrap();
        let m = &monitors[0];
        assert_eq!(m.body, Some(Body::Text("ping".to_string())));

        assert_eq!(m.validate(&response(200, r#"{"status": "up"}"#)), Validation::Success);
        assert!(matches!(
            m.validate(&response(200, r#"{"state": "up"}"#)),
            Validation::Failure(msg) if msg.starts_with("Body does not contain")
        ));
        assert!(matches!(
            m.validate(&response(200, r#"{"status": "down"}"#)),
            Validation::Failure(msg) if msg.starts_with("Body does not match")
        ));
        assert_ne!(m.validate(&response(500, r#"{"status": "up"}"#)), Validation::Success);
    }

    #[test]
    fn test_header_expectation() {
        let expect = Expectation {
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            ..Default::default()
        };
        let validator = expect.compile("api").unwrap();

        let mut resp = response(200, "{}");
        assert_ne!(validator(&resp), Validation::Success);
        resp.headers
            .insert("content-type", HeaderValue::from_static("application/json"));
        assert_eq!(validator(&resp), Validation::Success);
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        assert!(matches!(
            parse_monitors(r#"[{ "name": "x", "url": "https://e.com", "timeout": 100 }]"#, no_env),
            Err(MonitorError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_monitors(r#"[{ "name": "x", "url": "https://e.com", "expect": { "bodyMatches": "(" } }]"#, no_env),
            Err(MonitorError::InvalidPattern { .. })
        ));
        assert!(matches!(
            parse_monitors(r#"[{ "name": "x", "url": "https://e.com", "interval": 5 }]"#, no_env),
            Err(MonitorError::Parse(_))
        ));
        assert!(matches!(
            parse_monitors(
                r#"[{ "name": "x", "url": "https://a.com" }, { "name": "x", "url": "https://b.com" }]"#,
                no_env
            ),
            Err(MonitorError::DuplicateName(_))
        ));
    }
}
