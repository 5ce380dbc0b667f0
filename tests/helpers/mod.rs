//! In-process fakes for the pipeline's external collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use meal_snap::models::notification::NotificationContent;
use meal_snap::models::nutrition::{NewNutritionEntry, NutritionEstimate};
use meal_snap::pipeline::job::{AnalysisDeps, AnalysisJob};
use meal_snap::pipeline::notifier::ProgressNotifier;
use meal_snap::services::health_store::{HealthDataStore, HealthStoreError};
use meal_snap::services::image_store::{ImageListing, ImageStore, StorageError, StoredImage};
use meal_snap::services::notifications::{NotificationError, NotificationSink};
use meal_snap::services::vision::{VisionAnalysis, VisionAnalyzer, VisionError};

use crate::fixtures;

/// Vision service that replays scripted answers; the last one repeats.
pub struct ScriptedVision {
    script: Mutex<VecDeque<Result<VisionAnalysis, VisionError>>>,
    last: Mutex<Option<Result<VisionAnalysis, VisionError>>>,
    calls: Mutex<u32>,
    latency: Option<std::time::Duration>,
}

impl ScriptedVision {
    pub fn new(script: Vec<Result<VisionAnalysis, VisionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: Mutex::new(0),
            latency: None,
        }
    }

    /// Answer only after `latency` of wall-clock time.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn always(answer: fn() -> Result<VisionAnalysis, VisionError>) -> Self {
        Self::new(vec![answer()])
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

fn clone_answer(answer: &Result<VisionAnalysis, VisionError>) -> Result<VisionAnalysis, VisionError> {
    match answer {
        Ok(analysis) => Ok(analysis.clone()),
        Err(VisionError::Timeout(m)) => Err(VisionError::Timeout(m.clone())),
        Err(VisionError::Connection(m)) => Err(VisionError::Connection(m.clone())),
        Err(VisionError::MalformedResponse(m)) => Err(VisionError::MalformedResponse(m.clone())),
        Err(VisionError::Unauthorized { status }) => Err(VisionError::Unauthorized { status: *status }),
        Err(VisionError::Server { status, body }) => Err(VisionError::Server {
            status: *status,
            body: body.clone(),
        }),
        Err(other) => Err(VisionError::Other(other.to_string())),
    }
}

#[async_trait]
impl VisionAnalyzer for ScriptedVision {
    async fn analyze(&self, _image_bytes: &[u8]) -> Result<VisionAnalysis, VisionError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(answer) => {
                let result = clone_answer(&answer);
                *last = Some(answer);
                result
            }
            None => match last.as_ref() {
                Some(answer) => clone_answer(answer),
                None => Err(VisionError::Other("script exhausted".into())),
            },
        }
    }
}

pub fn estimate(calories: u32, description: &str) -> Result<VisionAnalysis, VisionError> {
    Ok(VisionAnalysis::Estimate(
        NutritionEstimate::new(calories, description).unwrap(),
    ))
}

pub fn timeout() -> Result<VisionAnalysis, VisionError> {
    Err(VisionError::Timeout("operation timed out".into()))
}

pub fn malformed() -> Result<VisionAnalysis, VisionError> {
    Err(VisionError::MalformedResponse("expected value at line 1".into()))
}

pub fn no_food() -> Result<VisionAnalysis, VisionError> {
    Ok(VisionAnalysis::NoFood {
        reason: "The photo shows a laptop".into(),
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StoreBehavior {
    Accept,
    PermissionDenied,
    Validation,
    Unavailable,
}

/// Health data store that records inserts and fails on demand.
/// Inserts are idempotent on `client_key`, like the real table.
pub struct FakeHealthStore {
    behavior: StoreBehavior,
    pub inserted: Mutex<Vec<NewNutritionEntry>>,
    records: Mutex<HashMap<Uuid, Uuid>>,
}

impl FakeHealthStore {
    pub fn new(behavior: StoreBehavior) -> Self {
        Self {
            behavior,
            inserted: Mutex::new(Vec::new()),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Distinct records, as opposed to insert calls.
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn inserted(&self) -> Vec<NewNutritionEntry> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthDataStore for FakeHealthStore {
    async fn insert(&self, entry: &NewNutritionEntry) -> Result<Uuid, HealthStoreError> {
        match self.behavior {
            StoreBehavior::Accept => {
                self.inserted.lock().unwrap().push(entry.clone());
                let mut records = self.records.lock().unwrap();
                Ok(*records.entry(entry.client_key).or_insert_with(Uuid::new_v4))
            }
            StoreBehavior::PermissionDenied => Err(HealthStoreError::PermissionDenied(
                "permission denied for table nutrition_entries".into(),
            )),
            StoreBehavior::Validation => Err(HealthStoreError::Validation("check violation".into())),
            StoreBehavior::Unavailable => Err(HealthStoreError::Unavailable("connection closed".into())),
        }
    }

    async fn find(&self, client_key: Uuid) -> Result<Option<Uuid>, HealthStoreError> {
        match self.behavior {
            StoreBehavior::Unavailable => Err(HealthStoreError::Unavailable("connection closed".into())),
            _ => Ok(self.records.lock().unwrap().get(&client_key).copied()),
        }
    }
}

/// Image store backed by a map, with controllable timestamps.
#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
    pub delete_calls: Mutex<Vec<String>>,
}

impl MemoryImageStore {
    pub fn with_image(handle: &str) -> Self {
        let store = Self::default();
        store.put(handle, fixtures::JPEG_BYTES, Utc::now());
        store
    }

    pub fn put(&self, handle: &str, bytes: &[u8], last_modified: DateTime<Utc>) {
        self.images
            .lock()
            .unwrap()
            .insert(handle.to_string(), (bytes.to_vec(), last_modified));
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.images.lock().unwrap().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.images.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn read(&self, handle: &str) -> Result<Vec<u8>, StorageError> {
        self.images
            .lock()
            .unwrap()
            .get(handle)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StorageError::NotFound(handle.to_string()))
    }

    async fn delete(&self, handle: &str) -> Result<(), StorageError> {
        self.delete_calls.lock().unwrap().push(handle.to_string());
        self.images.lock().unwrap().remove(handle);
        Ok(())
    }

    async fn list(&self) -> Result<ImageListing, StorageError> {
        let images = self
            .images
            .lock()
            .unwrap()
            .iter()
            .map(|(handle, (bytes, last_modified))| StoredImage {
                handle: handle.clone(),
                size_bytes: bytes.len() as u64,
                last_modified: *last_modified,
            })
            .collect();
        Ok(ImageListing {
            images,
            unreadable: 0,
        })
    }
}

/// Notification sink that keeps every post, in order.
#[derive(Default)]
pub struct RecordingNotifications {
    pub posts: Mutex<Vec<(String, NotificationContent)>>,
}

impl RecordingNotifications {
    pub fn posts(&self) -> Vec<(String, NotificationContent)> {
        self.posts.lock().unwrap().clone()
    }

    /// Posts that are not the persistent "running" notice.
    pub fn terminal_posts(&self) -> Vec<NotificationContent> {
        self.posts()
            .into_iter()
            .map(|(_, content)| content)
            .filter(|content| !content.ongoing)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn post(&self, key: &str, content: &NotificationContent) -> Result<(), NotificationError> {
        self.posts
            .lock()
            .unwrap()
            .push((key.to_string(), content.clone()));
        Ok(())
    }
}

/// A job wired to fakes, with handles kept for assertions.
pub struct Harness {
    pub vision: Arc<ScriptedVision>,
    pub store: Arc<FakeHealthStore>,
    pub images: Arc<MemoryImageStore>,
    pub notifications: Arc<RecordingNotifications>,
    pub job: AnalysisJob,
}

impl Harness {
    pub fn new(vision: ScriptedVision, store: StoreBehavior, images: MemoryImageStore) -> Self {
        let vision = Arc::new(vision);
        let store = Arc::new(FakeHealthStore::new(store));
        let images = Arc::new(images);
        let notifications = Arc::new(RecordingNotifications::default());

        let job = AnalysisJob::new(
            AnalysisDeps {
                vision: vision.clone(),
                health_store: store.clone(),
                images: images.clone(),
                notifications: notifications.clone(),
            },
            ProgressNotifier::new(fixtures::channel()),
            4,
        );

        Self {
            vision,
            store,
            images,
            notifications,
            job,
        }
    }
}
