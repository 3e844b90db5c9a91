//! Xiaomi OTA validation client.
//!
//! The recovery only accepts a sideload whose open string carries a token
//! issued by the OTA service. The request is the device identity plus the
//! package checksum, AES-128-CBC encrypted with a fixed key/IV, base64 and
//! form encoded; the response comes back the same way. The core never
//! interprets the token, it only embeds it in the sideload open string.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::device::DeviceInfo;

const OTA_URL: &str = "http://update.miui.com/updates/miotaV3.php";
const USER_AGENT: &str = "MiTunes_UserAgent_v3.0";

// Key and IV are fixed in the official client.
const AES_KEY: [u8; 16] = *b"miuiotavalided11";
const AES_IV: [u8; 16] = *b"0102030405060708";

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Validation unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct RequestOptions {
    zone: String,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    d: &'a str,
    v: &'a str,
    c: &'a str,
    b: &'a str,
    sn: &'a str,
    l: &'a str,
    f: &'a str,
    options: RequestOptions,
    pkg: &'a str,
}

/// Flash authorization from the OTA service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// Opaque token, passed through verbatim into the sideload open string.
    pub token: String,
    /// The service flagged that flashing will erase user data.
    pub erase: bool,
}

pub struct Validator {
    client: Client,
    url: String,
}

impl Validator {
    pub fn new(url_override: Option<&str>) -> Result<Self, ValidateError> {
        Ok(Self {
            client: Client::builder().user_agent(USER_AGENT).build()?,
            url: url_override.unwrap_or(OTA_URL).to_string(),
        })
    }

    /// Request a flash token for the package with the given checksum.
    #[instrument(skip(self, info))]
    pub fn request_token(&self, info: &DeviceInfo, md5: &str) -> Result<Validation, ValidateError> {
        let root = self.round_trip(info, md5)?;

        let Some(pkg_rom) = root.get("PkgRom") else {
            // No package entry: surface whatever message the service offered.
            let message = root
                .get("Code")
                .and_then(|c| c.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no validation available for this package")
                .to_string();
            return Err(ValidateError::Unavailable(message));
        };

        let token = pkg_rom
            .get("Validate")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidateError::Unavailable("response carried no Validate token".into()))?
            .to_string();
        let erase = pkg_rom
            .get("Erase")
            .and_then(Value::as_str)
            .unwrap_or("0")
            == "1";

        Ok(Validation { token, erase })
    }

    /// List the ROM packages the service offers for this device.
    #[instrument(skip(self, info))]
    pub fn list_roms(&self, info: &DeviceInfo) -> Result<Value, ValidateError> {
        self.round_trip(info, "")
    }

    fn round_trip(&self, info: &DeviceInfo, md5: &str) -> Result<Value, ValidateError> {
        let request = ValidateRequest {
            d: &info.device,
            v: &info.version,
            c: &info.codebase,
            b: &info.branch,
            sn: &info.sn,
            l: "en-US",
            f: "1",
            options: RequestOptions {
                zone: info.romzone.clone(),
            },
            pkg: md5,
        };
        let plain = serde_json::to_vec(&request)
            .map_err(|e| ValidateError::InvalidResponse(e.to_string()))?;

        let encrypted = aes128_cbc_encrypt(&AES_KEY, &AES_IV, &plain);
        let form = format!("q={}&t=&s=1", urlencoding::encode(&BASE64.encode(encrypted)));

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()?
            .bytes()?;

        let response = response
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect::<Vec<u8>>();
        let decoded = BASE64
            .decode(&response)
            .map_err(|e| ValidateError::Crypto(e.to_string()))?;
        let plain = aes128_cbc_decrypt(&AES_KEY, &AES_IV, &decoded)?;

        let json = extract_json(&plain)
            .ok_or_else(|| ValidateError::InvalidResponse("no JSON object in response".into()))?;
        debug!(len = json.len(), "decrypted validation response");
        serde_json::from_str(json).map_err(|e| ValidateError::InvalidResponse(e.to_string()))
    }
}

fn aes128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    use aes::Aes128;
    use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
    type Enc = cbc::Encryptor<Aes128>;
    Enc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plain)
}

fn aes128_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, ValidateError> {
    use aes::Aes128;
    use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
    type Dec = cbc::Decryptor<Aes128>;
    Dec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|e| ValidateError::Crypto(e.to_string()))
}

/// The decrypted body may carry padding or noise around the JSON object;
/// take the outermost brace-delimited slice.
fn extract_json(plain: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(plain).ok()?;
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_roundtrip() {
        let plain = br#"{"d":"aurora","pkg":"abc"}"#;
        let enc = aes128_cbc_encrypt(&AES_KEY, &AES_IV, plain);
        assert_ne!(enc.as_slice(), plain.as_slice());
        assert_eq!(enc.len() % 16, 0);
        let dec = aes128_cbc_decrypt(&AES_KEY, &AES_IV, &enc).unwrap();
        assert_eq!(dec, plain);
    }

    #[test]
    fn test_extract_json_outermost_braces() {
        assert_eq!(extract_json(b"noise{\"a\":1}trailing"), Some("{\"a\":1}"));
        assert_eq!(
            extract_json(b"{\"a\":{\"b\":2}}\x04\x04"),
            Some("{\"a\":{\"b\":2}}")
        );
        assert_eq!(extract_json(b"no json here"), None);
    }

    #[test]
    fn test_request_serializes_expected_fields() {
        let request = ValidateRequest {
            d: "aurora",
            v: "OS1.0.3.0",
            c: "14.0",
            b: "F",
            sn: "12345",
            l: "en-US",
            f: "1",
            options: RequestOptions { zone: "1".into() },
            pkg: "d41d8cd98f00b204e9800998ecf8427e",
        };
        let value: Value = serde_json::from_slice(&serde_json::to_vec(&request).unwrap()).unwrap();
        assert_eq!(value["d"], "aurora");
        assert_eq!(value["options"]["zone"], "1");
        assert_eq!(value["pkg"], "d41d8cd98f00b204e9800998ecf8427e");
    }
}
