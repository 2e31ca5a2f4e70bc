use crate::camera::{CameraGate, FfmpegCamera};
use crate::error::PipelineError;
use crate::pipeline::ImagePipeline;
use bytes::{BufMut, Bytes};
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use warp::http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Plate checker</title></head>
<body>
<h1>Plate checker</h1>
<form id="upload">
  <input type="file" name="image" accept=".png,.jpg,.jpeg">
  <button type="submit">Check plate</button>
</form>
<pre id="result"></pre>
<h2>Live feed</h2>
<img src="/video_feed" alt="camera feed">
<script>
document.getElementById('upload').addEventListener('submit', async (e) => {
  e.preventDefault();
  const res = await fetch('/process_image', { method: 'POST', body: new FormData(e.target) });
  document.getElementById('result').textContent = JSON.stringify(await res.json(), null, 2);
});
</script>
</body>
</html>
"#;

/// Everything the HTTP handlers share.
pub struct AppState {
    pipeline: Arc<ImagePipeline>,
    camera_device: String,
    camera_size: (u32, u32),
    camera_gate: CameraGate,
}

impl AppState {
    pub fn new(pipeline: Arc<ImagePipeline>, camera_device: String, camera_size: (u32, u32)) -> Self {
        AppState {
            pipeline,
            camera_device,
            camera_size,
            camera_gate: CameraGate::default(),
        }
    }

    pub fn camera_gate(&self) -> &CameraGate {
        &self.camera_gate
    }
}

pub async fn run(state: Arc<AppState>, addr: SocketAddr) {
    info!("Listening on {}", addr);
    warp::serve(routes(state)).run(addr).await;
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_state = warp::any().map(move || state.clone());

    // Paths before methods, so an unknown path is a 404 rather than a 405.
    let index_route = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(INDEX_HTML));

    let upload_route = warp::path!("process_image")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_state.clone())
        .and_then(process_image);

    let feed_route = warp::path!("video_feed")
        .and(warp::get())
        .and(with_state)
        .map(video_feed);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"]);

    index_route
        .or(upload_route)
        .or(feed_route)
        .with(cors)
        .recover(handle_rejection)
}

async fn process_image(
    form: warp::multipart::FormData,
    state: Arc<AppState>,
) -> Result<Response, Infallible> {
    let data = match read_upload(form).await {
        Ok(data) => data,
        Err(e) => return Ok(error_reply(&e)),
    };

    let pipeline = state.pipeline.clone();
    let result = tokio::task::spawn_blocking(move || pipeline.process_upload(&data))
        .await
        .unwrap_or_else(|e| Err(PipelineError::Unexpected(format!("Processing task failed: {}", e))));

    Ok(match result {
        Ok(report) => warp::reply::json(&report).into_response(),
        Err(e) => error_reply(&e),
    })
}

/// Pulls the `image` part out of the form and checks its file name.
async fn read_upload(mut form: warp::multipart::FormData) -> Result<Vec<u8>, PipelineError> {
    let mut image: Option<Vec<u8>> = None;

    while let Some(part) = form.next().await {
        let part = part.map_err(|e| PipelineError::Input(format!("Malformed upload: {}", e)))?;
        debug!("Got part {}", part.name());
        if part.name() != "image" {
            warn!("Ignoring part {}", part.name());
            continue;
        }

        let filename = part.filename().unwrap_or("").to_string();
        if filename.is_empty() {
            return Err(PipelineError::Input("No selected file".to_string()));
        }
        if !allowed_file(&filename) {
            return Err(PipelineError::Input("Invalid file type".to_string()));
        }

        let mut data: Vec<u8> = vec![];
        let mut stream = Box::pin(part.stream());
        while let Some(buf) = stream.next().await {
            let buf = buf.map_err(|e| PipelineError::Input(format!("Malformed upload: {}", e)))?;
            data.put(buf);
        }
        image = Some(data);
    }

    image.ok_or_else(|| PipelineError::Input("No image file provided".to_string()))
}

fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

fn error_reply(e: &PipelineError) -> Response {
    match e {
        PipelineError::Unexpected(_) => error!("Error processing image: {}", e),
        _ => info!("Rejected image: {}", e),
    }
    json_error(&e.to_string(), e.status())
}

fn json_error(message: &str, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status).into_response()
}

/// Streams annotated camera frames until the client goes away or the camera
/// stops delivering.
fn video_feed(state: Arc<AppState>) -> Response {
    let lease = match state.camera_gate.try_acquire() {
        Some(lease) => lease,
        None => return json_error("Camera is busy", StatusCode::SERVICE_UNAVAILABLE),
    };

    // Capacity 1: at most one encoded frame waits for the client.
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    let pipeline = state.pipeline.clone();
    let device = state.camera_device.clone();
    let (width, height) = state.camera_size;

    let spawned = thread::Builder::new()
        .name("video-feed".into())
        .spawn(move || {
            let _lease = lease;
            let mut camera = match FfmpegCamera::open(&device, width, height) {
                Ok(camera) => camera,
                Err(e) => {
                    error!("Error: Could not open camera: {}", e);
                    return;
                }
            };
            let frames = pipeline.stream_frames(&mut camera, |chunk| tx.blocking_send(Ok(chunk)).is_ok());
            info!("Video feed closed after {} frames", frames);
        });
    if let Err(e) = spawned {
        error!("Failed to spawn video feed thread: {}", e);
        return json_error("Could not start video feed", StatusCode::INTERNAL_SERVER_ERROR);
    }

    let frames = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    let mut response = Response::new(Body::wrap_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=frame"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (message, status) = if err.is_not_found() {
        ("Not found", StatusCode::NOT_FOUND)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ("Image is too large", StatusCode::BAD_REQUEST)
    } else if err.find::<warp::reject::MissingHeader>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
        || err.find::<warp::reject::LengthRequired>().is_some()
    {
        // Only the multipart upload reads request headers.
        ("No image file provided", StatusCode::BAD_REQUEST)
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        ("Cross-origin request not allowed", StatusCode::FORBIDDEN)
    } else {
        debug!("Rejected request: {:?}", err);
        ("Bad request", StatusCode::BAD_REQUEST)
    };
    Ok(json_error(message, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_extensions() {
        assert!(allowed_file("car.png"));
        assert!(allowed_file("car.JPG"));
        assert!(allowed_file("my.car.jpeg"));
        assert!(!allowed_file("car.gif"));
        assert!(!allowed_file("png"));
        assert!(!allowed_file("car."));
    }
}
