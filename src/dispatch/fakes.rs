//! In-process collaborators for dispatcher tests.

use std::{
    collections::{HashSet, VecDeque},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use crate::{
    counter::UnsentCounter,
    db::{Database, ImageRecord},
    network::StaticNetworkStatus,
    pictures::{PictureError, PictureStore},
    session::{PreferencesStore, SessionGate},
    transfer::{TransferError, TransferResponse, Uploader},
};

use super::Dispatcher;

pub(crate) struct FakePictures {
    db: Database,
    files: Mutex<HashSet<String>>,
    panic_on: Mutex<HashSet<String>>,
    hang_on: Mutex<HashSet<String>>,
    checks: AtomicUsize,
    leased_during_check: Mutex<Vec<bool>>,
}

impl FakePictures {
    fn new(db: Database) -> Self {
        Self {
            db,
            files: Mutex::default(),
            panic_on: Mutex::default(),
            hang_on: Mutex::default(),
            checks: AtomicUsize::new(0),
            leased_during_check: Mutex::default(),
        }
    }

    pub fn insert(&self, name: &str) {
        self.files.lock().unwrap().insert(name.to_string());
    }

    pub fn panic_on(&self, name: &str) {
        self.panic_on.lock().unwrap().insert(name.to_string());
    }

    pub fn hang_on(&self, name: &str) {
        self.hang_on.lock().unwrap().insert(name.to_string());
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn leased_during_check(&self) -> Vec<bool> {
        self.leased_during_check.lock().unwrap().clone()
    }
}

#[async_trait]
impl PictureStore for FakePictures {
    async fn exists(&self, name: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);

        let leased = self
            .db
            .get_image(name)
            .await
            .ok()
            .flatten()
            .map(|image| image.ignore)
            .unwrap_or(false);
        self.leased_during_check.lock().unwrap().push(leased);

        let should_panic = self.panic_on.lock().unwrap().contains(name);
        if should_panic {
            panic!("storage plugin crashed while checking {name}");
        }
        let should_hang = self.hang_on.lock().unwrap().contains(name);
        if should_hang {
            std::future::pending::<()>().await;
        }

        self.files.lock().unwrap().contains(name)
    }

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, PictureError> {
        if self.files.lock().unwrap().contains(name) {
            Ok(vec![0xFF; 16])
        } else {
            Err(PictureError::NotFound(name.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScriptedResponse {
    Status(u16),
    TransportError,
}

/// Replays queued responses; answers 500 once the script runs out.
#[derive(Default)]
pub(crate) struct ScriptedUploader {
    script: Mutex<VecDeque<ScriptedResponse>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedUploader {
    pub fn push(&self, response: ScriptedResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(&self, record: &ImageRecord) -> Result<TransferResponse, TransferError> {
        self.attempts.lock().unwrap().push(record.name.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedResponse::Status(500));

        match next {
            ScriptedResponse::Status(status) => Ok(TransferResponse {
                status,
                body: "{}".into(),
            }),
            ScriptedResponse::TransportError => Err(TransferError::Picture(PictureError::Io {
                name: record.name.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            })),
        }
    }
}

#[derive(Default)]
pub(crate) struct CountingCounter {
    refreshes: AtomicUsize,
}

impl CountingCounter {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl UnsentCounter for CountingCounter {
    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A dispatcher wired to a throwaway store, a logged-in session and an
/// online network.
pub(crate) struct Harness {
    _dir: TempDir,
    pub db: Database,
    pub gate: SessionGate,
    pub network: Arc<StaticNetworkStatus>,
    pub pictures: Arc<FakePictures>,
    pub uploader: Arc<ScriptedUploader>,
    pub counter: Arc<CountingCounter>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_presence_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_presence_timeout(presence_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("dispatch.sqlite3")).unwrap();

        let prefs = Arc::new(PreferencesStore::in_memory());
        prefs
            .login("https://photos.example.org", "tester@example.org", "sid-1")
            .unwrap();
        let network = Arc::new(StaticNetworkStatus::new(true));
        let gate = SessionGate::new(prefs, network.clone());

        let pictures = Arc::new(FakePictures::new(db.clone()));
        let uploader = Arc::new(ScriptedUploader::default());
        let counter = Arc::new(CountingCounter::default());

        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            gate.clone(),
            pictures.clone(),
            uploader.clone(),
            counter.clone(),
            presence_timeout,
        ));

        Self {
            _dir: dir,
            db,
            gate,
            network,
            pictures,
            uploader,
            counter,
            dispatcher,
        }
    }

    pub async fn add_image(&self, name: &str, file_present: bool) {
        self.db.create_image(name, 10.0, Utc::now()).await.unwrap();
        if file_present {
            self.pictures.insert(name);
        }
    }
}
