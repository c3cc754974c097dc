//! Real backend transport
//!
//! Speaks a length-prefixed bincode protocol over TCP: one request/response
//! round-trip per connection toward the privileged backend service, and a
//! local listener accepting pushed event frames (backend push events and
//! forwarded OS lifecycle notifications share one tagged envelope).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::traits::{BackendRpc, EventSource};
use shared::{
    BackendConfig, CoreOffsets, DiagnosticsExport, DynamicSettings, ImportSummary, LifecycleEvent,
    PlatformInfo, Preset, RpcAck, ServerEvent, SharedError, SystemInfo, TestRecord, TuneMode,
};

/// Upper bound on a single wire frame
const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum BackendRequest {
    Init,
    FetchConfig,
    GetPlatformInfo,
    GetTestHistory,
    ApplyUndervolt { cores: CoreOffsets, timeout_secs: u32 },
    DisableUndervolt,
    PanicDisable,
    StartGymdeck { settings: DynamicSettings },
    StopGymdeck,
    StartAutotune { mode: TuneMode },
    StopAutotune,
    RunTest { name: String },
    SavePreset { preset: Preset },
    UpdatePreset { preset: Preset },
    DeletePreset { app_id: u32 },
    ExportPresets,
    ImportPresets { text: String },
    ResetConfig,
    ExportDiagnostics,
    GetSystemInfo,
}

#[derive(Debug, Serialize, Deserialize)]
enum BackendResponse {
    Ok,
    Config(BackendConfig),
    Platform(PlatformInfo),
    History(Vec<TestRecord>),
    Ack(RpcAck),
    Test(TestRecord),
    Text(String),
    Import(ImportSummary),
    Diagnostics(DiagnosticsExport),
    System(SystemInfo),
    Error(String),
}

/// Tagged envelope for pushed frames on the event channel
#[derive(Debug, Serialize, Deserialize)]
enum WireEvent {
    Server(ServerEvent),
    Lifecycle(LifecycleEvent),
}

fn unexpected(operation: &str, response: &BackendResponse) -> EngineError {
    EngineError::SharedError(SharedError::ProtocolError {
        message: format!("unexpected response to {operation}: {response:?}"),
    })
}

/// RPC client toward the privileged voltage backend
pub struct RealBackend {
    address: SocketAddr,
}

impl RealBackend {
    pub fn new(address: SocketAddr) -> Self {
        Self { address }
    }

    /// Send one request frame and await its response frame
    async fn call(&self, operation: &str, request: &BackendRequest) -> EngineResult<BackendResponse> {
        let mut stream = TcpStream::connect(self.address)
            .await
            .map_err(|e| EngineError::unavailable(format!("connect to {}: {e}", self.address)))?;

        let data = bincode::serialize(request).map_err(|e| {
            EngineError::SharedError(SharedError::SerializationError {
                message: format!("{operation} request: {e}"),
            })
        })?;
        stream
            .write_all(&(data.len() as u32).to_be_bytes())
            .await
            .map_err(|e| EngineError::unavailable(format!("write length: {e}")))?;
        stream
            .write_all(&data)
            .await
            .map_err(|e| EngineError::unavailable(format!("write frame: {e}")))?;

        let mut len_bytes = [0u8; 4];
        stream
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| EngineError::unavailable(format!("read length: {e}")))?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(EngineError::SharedError(SharedError::ProtocolError {
                message: format!("response frame of {len} bytes exceeds limit"),
            }));
        }
        let mut data = vec![0u8; len];
        stream
            .read_exact(&mut data)
            .await
            .map_err(|e| EngineError::unavailable(format!("read frame: {e}")))?;

        let response = bincode::deserialize::<BackendResponse>(&data).map_err(|e| {
            EngineError::SharedError(SharedError::DeserializationError {
                message: format!("{operation} response: {e}"),
            })
        })?;

        match response {
            BackendResponse::Error(reason) => Err(EngineError::rejected(operation, reason)),
            other => Ok(other),
        }
    }

    async fn call_unit(&self, operation: &str, request: BackendRequest) -> EngineResult<()> {
        match self.call(operation, &request).await? {
            BackendResponse::Ok => Ok(()),
            other => Err(unexpected(operation, &other)),
        }
    }

    async fn call_ack(&self, operation: &str, request: BackendRequest) -> EngineResult<RpcAck> {
        match self.call(operation, &request).await? {
            BackendResponse::Ack(ack) => Ok(ack),
            other => Err(unexpected(operation, &other)),
        }
    }
}

#[async_trait]
impl BackendRpc for RealBackend {
    async fn init(&self) -> EngineResult<()> {
        self.call_unit("init", BackendRequest::Init).await
    }

    async fn fetch_config(&self) -> EngineResult<BackendConfig> {
        match self.call("fetch_config", &BackendRequest::FetchConfig).await? {
            BackendResponse::Config(config) => Ok(config),
            other => Err(unexpected("fetch_config", &other)),
        }
    }

    async fn get_platform_info(&self) -> EngineResult<PlatformInfo> {
        match self.call("get_platform_info", &BackendRequest::GetPlatformInfo).await? {
            BackendResponse::Platform(info) => Ok(info),
            other => Err(unexpected("get_platform_info", &other)),
        }
    }

    async fn get_test_history(&self) -> EngineResult<Vec<TestRecord>> {
        match self.call("get_test_history", &BackendRequest::GetTestHistory).await? {
            BackendResponse::History(records) => Ok(records),
            other => Err(unexpected("get_test_history", &other)),
        }
    }

    async fn apply_undervolt(&self, cores: CoreOffsets, timeout_secs: u32) -> EngineResult<()> {
        self.call_unit(
            "apply_undervolt",
            BackendRequest::ApplyUndervolt { cores, timeout_secs },
        )
        .await
    }

    async fn disable_undervolt(&self) -> EngineResult<()> {
        self.call_unit("disable_undervolt", BackendRequest::DisableUndervolt).await
    }

    async fn panic_disable(&self) -> EngineResult<()> {
        self.call_unit("panic_disable", BackendRequest::PanicDisable).await
    }

    async fn start_gymdeck(&self, settings: DynamicSettings) -> EngineResult<()> {
        self.call_unit("start_gymdeck", BackendRequest::StartGymdeck { settings }).await
    }

    async fn stop_gymdeck(&self) -> EngineResult<()> {
        self.call_unit("stop_gymdeck", BackendRequest::StopGymdeck).await
    }

    async fn start_autotune(&self, mode: TuneMode) -> EngineResult<RpcAck> {
        self.call_ack("start_autotune", BackendRequest::StartAutotune { mode }).await
    }

    async fn stop_autotune(&self) -> EngineResult<RpcAck> {
        self.call_ack("stop_autotune", BackendRequest::StopAutotune).await
    }

    async fn run_test(&self, name: String) -> EngineResult<TestRecord> {
        match self.call("run_test", &BackendRequest::RunTest { name }).await? {
            BackendResponse::Test(record) => Ok(record),
            other => Err(unexpected("run_test", &other)),
        }
    }

    async fn save_preset(&self, preset: Preset) -> EngineResult<()> {
        self.call_unit("save_preset", BackendRequest::SavePreset { preset }).await
    }

    async fn update_preset(&self, preset: Preset) -> EngineResult<()> {
        self.call_unit("update_preset", BackendRequest::UpdatePreset { preset }).await
    }

    async fn delete_preset(&self, app_id: u32) -> EngineResult<()> {
        self.call_unit("delete_preset", BackendRequest::DeletePreset { app_id }).await
    }

    async fn export_presets(&self) -> EngineResult<String> {
        match self.call("export_presets", &BackendRequest::ExportPresets).await? {
            BackendResponse::Text(text) => Ok(text),
            other => Err(unexpected("export_presets", &other)),
        }
    }

    async fn import_presets(&self, text: String) -> EngineResult<ImportSummary> {
        match self.call("import_presets", &BackendRequest::ImportPresets { text }).await? {
            BackendResponse::Import(summary) => Ok(summary),
            other => Err(unexpected("import_presets", &other)),
        }
    }

    async fn reset_config(&self) -> EngineResult<BackendConfig> {
        match self.call("reset_config", &BackendRequest::ResetConfig).await? {
            BackendResponse::Config(config) => Ok(config),
            other => Err(unexpected("reset_config", &other)),
        }
    }

    async fn export_diagnostics(&self) -> EngineResult<DiagnosticsExport> {
        match self.call("export_diagnostics", &BackendRequest::ExportDiagnostics).await? {
            BackendResponse::Diagnostics(export) => Ok(export),
            other => Err(unexpected("export_diagnostics", &other)),
        }
    }

    async fn get_system_info(&self) -> EngineResult<SystemInfo> {
        match self.call("get_system_info", &BackendRequest::GetSystemInfo).await? {
            BackendResponse::System(info) => Ok(info),
            other => Err(unexpected("get_system_info", &other)),
        }
    }
}

/// Listener for pushed event frames from the backend and the OS notifier
pub struct RealEventSource {
    bind_addr: SocketAddr,
    local_addr: Mutex<Option<SocketAddr>>,
    server_tx: Arc<Mutex<Option<mpsc::Sender<ServerEvent>>>>,
    lifecycle_tx: Arc<Mutex<Option<mpsc::Sender<LifecycleEvent>>>>,
    listener_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RealEventSource {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            local_addr: Mutex::new(None),
            server_tx: Arc::new(Mutex::new(None)),
            lifecycle_tx: Arc::new(Mutex::new(None)),
            listener_handle: Mutex::new(None),
        }
    }

    /// Address actually bound, once listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Bind the listener and start the accept loop; no-op when already
    /// listening
    async fn ensure_listening(&self) -> EngineResult<()> {
        let mut handle = self.listener_handle.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| EngineError::unavailable(format!("bind {}: {e}", self.bind_addr)))?;
        *self.local_addr.lock().await = listener.local_addr().ok();

        let server_tx = self.server_tx.clone();
        let lifecycle_tx = self.lifecycle_tx.clone();
        *handle = Some(tokio::spawn(async move {
            while let Ok((mut stream, _addr)) = listener.accept().await {
                let server_tx = server_tx.clone();
                let lifecycle_tx = lifecycle_tx.clone();

                tokio::spawn(async move {
                    let mut len_bytes = [0u8; 4];
                    if stream.read_exact(&mut len_bytes).await.is_err() {
                        return;
                    }
                    let len = u32::from_be_bytes(len_bytes) as usize;
                    if len > MAX_FRAME_BYTES {
                        return;
                    }
                    let mut data = vec![0u8; len];
                    if stream.read_exact(&mut data).await.is_err() {
                        return;
                    }

                    match bincode::deserialize::<WireEvent>(&data) {
                        Ok(WireEvent::Server(event)) => {
                            if let Some(tx) = server_tx.lock().await.as_ref() {
                                let _ = tx.send(event).await;
                            }
                        }
                        Ok(WireEvent::Lifecycle(event)) => {
                            if let Some(tx) = lifecycle_tx.lock().await.as_ref() {
                                let _ = tx.send(event).await;
                            }
                        }
                        Err(e) => debug!("Dropping unparseable event frame: {e}"),
                    }
                });
            }
        }));

        Ok(())
    }
}

#[async_trait]
impl EventSource for RealEventSource {
    async fn subscribe_server_events(&self) -> EngineResult<mpsc::Receiver<ServerEvent>> {
        self.ensure_listening().await?;
        let (tx, rx) = mpsc::channel(100);
        *self.server_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn subscribe_lifecycle_events(&self) -> EngineResult<mpsc::Receiver<LifecycleEvent>> {
        self.ensure_listening().await?;
        let (tx, rx) = mpsc::channel(100);
        *self.lifecycle_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn shutdown(&self) -> EngineResult<()> {
        if let Some(handle) = self.listener_handle.lock().await.take() {
            handle.abort();
        }
        *self.server_tx.lock().await = None;
        *self.lifecycle_tx.lock().await = None;
        *self.local_addr.lock().await = None;
        Ok(())
    }
}
