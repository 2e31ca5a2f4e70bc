use super::Recognizer;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use failure::Error;
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use log::debug;
use serde_json::{json, Value};
use std::time::Duration;

const PROMPT: &str = "This image is a cropped vehicle license plate. \
Reply with the plate number only, using hyphens between its groups (for example WP-CAB-1234). \
If no plate number is legible, reply NONE.";

/// Reads plates with a hosted multimodal model through the `generateContent`
/// REST call.
pub struct GeminiRecognizer {
    client: reqwest::blocking::Client,
    url: String,
    api_key: String,
}

impl GeminiRecognizer {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(GeminiRecognizer {
            client,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                endpoint.trim_end_matches('/'),
                model
            ),
            api_key,
        })
    }
}

impl Recognizer for GeminiRecognizer {
    fn recognize(&self, region: &RgbImage) -> Result<Option<String>, Error> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90).encode_image(region)?;

        let body = json!({
            "contents": [{
                "parts": [
                    { "text": PROMPT },
                    { "inline_data": { "mime_type": "image/jpeg", "data": STANDARD.encode(&jpeg) } }
                ]
            }]
        });
        let response: Value = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;

        let reply = reply_text(&response)?;
        debug!("Model replied {:?}", reply);
        Ok(canonicalize_reply(reply))
    }
}

fn reply_text(response: &Value) -> Result<&str, Error> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| format_err!("Missing text in model response: {}", response))
}

/// Reduces the model's formatted reply to the registry key format:
/// uppercase letters and digits only.
fn canonicalize_reply(reply: &str) -> Option<String> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.eq_ignore_ascii_case("none") {
        return None;
    }
    let plate: String = line
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if plate.is_empty() {
        None
    } else {
        Some(plate)
    }
}
