use failure::Error;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
/// Largest accepted camera side, in pixels.
const MAX_CAMERA_SIDE: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    Gemini,
    Tesseract,
}

/// Service settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub registry_path: PathBuf,
    pub model_path: PathBuf,
    pub recognizer: RecognizerKind,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_endpoint: String,
    pub tessdata: Option<String>,
    pub camera_device: String,
    pub camera_size: (u32, u32),
    pub jpeg_quality: u8,
    pub font_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind = var("LPR_BIND", "0.0.0.0:8080");
        let bind = bind
            .parse::<SocketAddr>()
            .map_err(|e| format_err!("Invalid LPR_BIND {:?}: {}", bind, e))?;

        let recognizer = match var("LPR_RECOGNIZER", "gemini").to_ascii_lowercase().as_str() {
            "gemini" => RecognizerKind::Gemini,
            "tesseract" => RecognizerKind::Tesseract,
            other => return Err(format_err!("Unknown LPR_RECOGNIZER {:?}", other)),
        };

        let camera_size = parse_size(&var("LPR_CAMERA_SIZE", "640x480"))?;

        let quality = var("LPR_JPEG_QUALITY", "80");
        let jpeg_quality = match quality.parse::<u8>() {
            Ok(q) if (1..=100).contains(&q) => q,
            _ => return Err(format_err!("LPR_JPEG_QUALITY must be 1-100, got {:?}", quality)),
        };

        Ok(Config {
            bind,
            registry_path: PathBuf::from(var("LPR_REGISTRY", "registry.json")),
            model_path: PathBuf::from(var("LPR_MODEL", "runs/detect/train/weights/best.onnx")),
            recognizer,
            gemini_api_key: lookup("GEMINI_API_KEY").filter(|k| !k.is_empty()),
            gemini_model: var("LPR_GEMINI_MODEL", "gemini-1.5-flash"),
            gemini_endpoint: var("LPR_GEMINI_ENDPOINT", DEFAULT_GEMINI_ENDPOINT),
            tessdata: lookup("LPR_TESSDATA"),
            camera_device: var("LPR_CAMERA", "/dev/video0"),
            camera_size,
            jpeg_quality,
            font_path: PathBuf::from(var("LPR_FONT", DEFAULT_FONT)),
        })
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), Error> {
    let invalid = || format_err!("Invalid LPR_CAMERA_SIZE {:?}, expected WIDTHxHEIGHT", value);
    let mut parts = value.splitn(2, |c| c == 'x' || c == 'X');
    let width: u32 = parts.next().and_then(|w| w.trim().parse().ok()).ok_or_else(invalid)?;
    let height: u32 = parts.next().and_then(|h| h.trim().parse().ok()).ok_or_else(invalid)?;
    if width == 0 || height == 0 || width > MAX_CAMERA_SIDE || height > MAX_CAMERA_SIDE {
        return Err(invalid());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(c.registry_path, PathBuf::from("registry.json"));
        assert_eq!(c.recognizer, RecognizerKind::Gemini);
        assert_eq!(c.gemini_api_key, None);
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.camera_size, (640, 480));
        assert_eq!(c.jpeg_quality, 80);
        assert_eq!(c.font_path, PathBuf::from(DEFAULT_FONT));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("LPR_BIND", "127.0.0.1:9000"),
            ("LPR_RECOGNIZER", "Tesseract"),
            ("LPR_CAMERA_SIZE", "1280x720"),
            ("GEMINI_API_KEY", "secret"),
            ("LPR_JPEG_QUALITY", "95"),
        ])
        .unwrap();
        assert_eq!(c.bind.port(), 9000);
        assert_eq!(c.recognizer, RecognizerKind::Tesseract);
        assert_eq!(c.camera_size, (1280, 720));
        assert_eq!(c.gemini_api_key.as_deref(), Some("secret"));
        assert_eq!(c.jpeg_quality, 95);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("LPR_BIND", "nowhere")]).is_err());
        assert!(config(&[("LPR_RECOGNIZER", "crystal-ball")]).is_err());
        assert!(config(&[("LPR_CAMERA_SIZE", "640")]).is_err());
        assert!(config(&[("LPR_CAMERA_SIZE", "0x480")]).is_err());
        assert!(config(&[("LPR_CAMERA_SIZE", "100000x100000")]).is_err());
        assert!(config(&[("LPR_JPEG_QUALITY", "0")]).is_err());
    }
}
