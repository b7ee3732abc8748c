use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde::Serialize;

/// One agent replica of a named service, as sent on register/keepalive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUnderTest {
    pub name: String,
    pub address: String,
}

/// Selection and filtering parameters shared by the profile-shaped
/// endpoints (profile, clear, remove, report).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRequest {
    pub force: bool,
    pub service: Vec<String>,
    pub address: Vec<String>,
    pub coverfile: Vec<String>,
    pub skipfile: Vec<String>,
}

impl ProfileRequest {
    /// Decodes repeated query parameters, e.g.
    /// `force=1&service=a&service=b&coverfile=%5Efoo`.
    pub fn from_query(raw: &str) -> Self {
        let mut request = Self::default();
        for (key, value) in query_pairs(raw) {
            match key.as_str() {
                "force" => request.force = is_truthy(&value),
                "service" => request.service.push(value),
                "address" => request.address.push(value),
                "coverfile" => request.coverfile.push(value),
                "skipfile" => request.skipfile.push(value),
                _ => {}
            }
        }
        request
    }
}

pub(crate) fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Splits a raw query (or form-urlencoded body) into decoded pairs.
pub(crate) fn query_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
