//! Deployment annotations for the New Relic deployments endpoint.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::revision::RevisionPair;
use crate::settings::NewRelicSettings;
use crate::utils::template::{self, TemplateVars};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One deployment record as the annotation API receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub description: String,
    pub revision: String,
    pub app_id: String,
    pub changelog: String,
}

impl Deployment {
    /// Form fields in the order the endpoint documents them.
    pub fn form_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("deployment[description]", self.description.as_str()),
            ("deployment[revision]", self.revision.as_str()),
            ("deployment[app_id]", self.app_id.as_str()),
            ("deployment[changelog]", self.changelog.as_str()),
        ]
    }
}

/// Append the compare link to a non-empty changelog.
pub fn changelog_with_compare_link(
    changelog: &str,
    compare_url: &str,
    revisions: &RevisionPair,
) -> String {
    if changelog.is_empty() {
        return String::new();
    }

    let link = template::render(
        compare_url,
        &[
            (TemplateVars::OLD_REV, revisions.old.as_str()),
            (TemplateVars::NEW_REV, revisions.new.as_str()),
        ],
    );
    format!("{}\n\n{}", changelog, link)
}

/// POST the deployment. Returns the HTTP status on success.
pub fn post(settings: &NewRelicSettings, deployment: &Deployment) -> Result<u16> {
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or_else(|| Error::config_missing_key("newRelic.apiKey", None))?;

    let client = reqwest::blocking::Client::builder()
        .user_agent(format!("rollout/{}", VERSION))
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

    let response = client
        .post(&settings.url)
        .header("x-api-key", api_key)
        .form(&deployment.form_fields()[..])
        .send()
        .map_err(|e| Error::notify_failed(&settings.url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::notify_failed(
            &settings.url,
            format!("HTTP {}", status.as_u16()),
        ));
    }

    Ok(status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn compare_link_follows_changelog() {
        let pair = RevisionPair::new("aaa", "bbb");
        let changelog = changelog_with_compare_link(
            "bbb Fix bug 12",
            "https://github.com/org/app/compare/{{oldrev}}...{{newrev}}",
            &pair,
        );
        assert_eq!(
            changelog,
            "bbb Fix bug 12\n\nhttps://github.com/org/app/compare/aaa...bbb"
        );
    }

    #[test]
    fn empty_changelog_gets_no_link() {
        let pair = RevisionPair::new("aaa", "bbb");
        assert_eq!(changelog_with_compare_link("", "{{oldrev}}", &pair), "");
    }

    #[test]
    fn form_fields_use_deployment_keys() {
        let deployment = Deployment {
            description: "Fixing: bug #1".to_string(),
            revision: "bbb".to_string(),
            app_id: "42".to_string(),
            changelog: "bbb Fix bug 1".to_string(),
        };
        let fields = deployment.form_fields();
        assert_eq!(fields[0], ("deployment[description]", "Fixing: bug #1"));
        assert_eq!(fields[2], ("deployment[app_id]", "42"));
    }

    /// Accept one HTTP request, answer with `status_line`, return the raw request.
    fn serve_once(status_line: &'static str) -> (String, std::thread::JoinHandle<String>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/deployments.xml", listener.local_addr().unwrap());

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = stream.read(&mut buf).unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if !name.eq_ignore_ascii_case("content-length") {
                                return None;
                            }
                            value.trim().parse::<usize>().ok()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status_line
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    fn sample_deployment() -> Deployment {
        Deployment {
            description: "Fixing: bug #12".to_string(),
            revision: "bbb222".to_string(),
            app_id: "42".to_string(),
            changelog: "bbb222 Fix bug 12\n\nhttps://example.com/compare".to_string(),
        }
    }

    #[test]
    fn post_sends_api_key_and_form_body() {
        let (url, server) = serve_once("HTTP/1.1 201 Created");
        let settings = NewRelicSettings {
            api_key: Some("secret-key".to_string()),
            app_id: Some("42".to_string()),
            url,
        };

        let status = post(&settings, &sample_deployment()).unwrap();
        let request = server.join().unwrap();
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        let head = head.to_ascii_lowercase();

        assert_eq!(status, 201);
        assert!(request.starts_with("POST /deployments.xml HTTP/1.1\r\n"));
        assert!(head.contains("\r\nx-api-key: secret-key"));
        assert!(head.contains("content-type: application/x-www-form-urlencoded"));
        assert_eq!(
            body,
            "deployment%5Bdescription%5D=Fixing%3A+bug+%2312\
             &deployment%5Brevision%5D=bbb222\
             &deployment%5Bapp_id%5D=42\
             &deployment%5Bchangelog%5D=bbb222+Fix+bug+12%0A%0Ahttps%3A%2F%2Fexample.com%2Fcompare"
        );
    }

    #[test]
    fn non_success_status_is_a_notify_error() {
        let (url, server) = serve_once("HTTP/1.1 403 Forbidden");
        let settings = NewRelicSettings {
            api_key: Some("wrong".to_string()),
            app_id: Some("42".to_string()),
            url,
        };

        let err = post(&settings, &sample_deployment()).unwrap_err();
        server.join().unwrap();

        assert_eq!(err.code, ErrorCode::NotifyFailed);
        assert_eq!(err.details["error"], "HTTP 403");
    }

    #[test]
    fn unreachable_endpoint_is_a_notify_error() {
        let settings = NewRelicSettings {
            api_key: Some("key".to_string()),
            app_id: Some("42".to_string()),
            url: "http://127.0.0.1:9/deployments.xml".to_string(),
        };
        let deployment = Deployment {
            description: "d".to_string(),
            revision: "r".to_string(),
            app_id: "42".to_string(),
            changelog: String::new(),
        };
        let err = post(&settings, &deployment).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotifyFailed);
    }
}
