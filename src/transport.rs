use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::models::{LocalId, UploaderId};
use crate::utils::sanitize_filename;

/// Identity the service stamps on a file so every later transport event
/// resolves back to the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub uploader_id: UploaderId,
    pub local_id: LocalId,
}

/// What the transport reports back about a submitted file.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Progress { stamp: FileStamp, loaded: u64, total: u64 },
    /// request finished; `result` is the raw response body
    Done { stamp: FileStamp, result: String },
    /// request failed; `response` is the raw error body, possibly empty
    Fail { stamp: FileStamp, response: String },
}

impl TransportEvent {
    pub fn stamp(&self) -> &FileStamp {
        match self {
            TransportEvent::Progress { stamp, .. }
            | TransportEvent::Done { stamp, .. }
            | TransportEvent::Fail { stamp, .. } => stamp,
        }
    }
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

// a file picked by the user, not yet uploaded
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub source: FileSource,
}

impl SelectedFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            source: FileSource::Memory(data.into()),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            source: FileSource::Path(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub stamp: FileStamp,
    pub file: SelectedFile,
    pub url: String,
    pub form_data: BTreeMap<String, String>,
}

/// Cancellation capability for one submitted file. Aborting before the
/// transport attaches its task still takes effect once it does.
#[derive(Clone, Default)]
pub struct TransportHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default)]
struct HandleInner {
    aborted: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, task: AbortHandle) {
        let mut slot = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_aborted() {
            task.abort();
            return;
        }
        *slot = Some(task);
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Moves bytes to the remote and reports back through its event sink.
/// `submit` must not block; the work runs in the background.
pub trait UploadTransport: Send + Sync {
    fn submit(&self, request: UploadRequest, handle: TransportHandle);
}

/// Multipart POST transport. The file is streamed in `chunk_size` pieces
/// and a progress event goes out as each piece is handed to the body.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    events: EventSink,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, events: EventSink, chunk_size: usize) -> Self {
        Self {
            http,
            events,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl UploadTransport for HttpTransport {
    fn submit(&self, request: UploadRequest, handle: TransportHandle) {
        let http = self.http.clone();
        let events = self.events.clone();
        let chunk_size = self.chunk_size;

        let task = tokio::spawn(async move {
            let stamp = request.stamp.clone();
            let event = match send(http, events.clone(), request, chunk_size).await {
                Ok((status, body)) if status.is_success() => {
                    tracing::debug!("Upload {} finished with {}", stamp.local_id, status);
                    TransportEvent::Done { stamp, result: body }
                }
                Ok((status, body)) => {
                    tracing::warn!("Upload {} rejected with {}", stamp.local_id, status);
                    TransportEvent::Fail { stamp, response: body }
                }
                Err(e) => {
                    tracing::warn!("Upload {} failed: {}", stamp.local_id, e);
                    TransportEvent::Fail { stamp, response: String::new() }
                }
            };
            let _ = events.send(event);
        });

        handle.attach(task.abort_handle());
    }
}

async fn send(
    http: reqwest::Client,
    events: EventSink,
    request: UploadRequest,
    chunk_size: usize,
) -> crate::error::Result<(reqwest::StatusCode, String)> {
    let (total, chunks) = open_chunks(&request.file.source, chunk_size).await?;

    let stamp = request.stamp.clone();
    let mut loaded = 0u64;
    let body = chunks.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            loaded += bytes.len() as u64;
            let _ = events.send(TransportEvent::Progress {
                stamp: stamp.clone(),
                loaded,
                total,
            });
        }
        chunk
    });

    let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
        .file_name(sanitize_filename(&request.file.name));
    let form = request
        .form_data
        .into_iter()
        .fold(reqwest::multipart::Form::new(), |form, (k, v)| form.text(k, v))
        .part("file", part);

    let response = http.post(&request.url).multipart(form).send().await?;
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

async fn open_chunks(
    source: &FileSource,
    chunk_size: usize,
) -> std::io::Result<(u64, BoxStream<'static, std::io::Result<Bytes>>)> {
    match source {
        FileSource::Memory(data) => {
            let data = data.clone();
            let total = data.len() as u64;
            let pieces: Vec<std::io::Result<Bytes>> = (0..data.len())
                .step_by(chunk_size)
                .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
                .collect();
            Ok((total, stream::iter(pieces).boxed()))
        }
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(path).await?;
            let total = file.metadata().await?.len();
            let chunks = stream::try_unfold(file, move |mut file| async move {
                let mut buf = vec![0u8; chunk_size];
                let mut filled = 0;
                while filled < chunk_size {
                    let n = file.read(&mut buf[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    return Ok(None);
                }
                buf.truncate(filled);
                Ok::<_, std::io::Error>(Some((Bytes::from(buf), file)))
            });
            Ok((total, chunks.boxed()))
        }
    }
}
