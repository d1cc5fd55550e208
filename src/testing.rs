//! In-memory collaborators shared by unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::oracle::{OracleError, TextOracle};
use crate::store::{BlobObject, BlobStore, ListPage, ObjectSummary, StoreError};

type ObjectKey = (String, String);

#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: BTreeMap<ObjectKey, String>,
    failures: HashSet<ObjectKey>,
    page_size: Option<usize>,
    delay: Option<Duration>,
    get_calls: AtomicUsize,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_object(mut self, bucket: &str, key: &str, content: &str) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), content.to_string());
        self
    }

    /// Listed like any other object, but every `get` fails with an I/O error.
    pub(crate) fn with_failure(mut self, bucket: &str, key: &str) -> Self {
        let id = (bucket.to_string(), key.to_string());
        self.objects.insert(id.clone(), String::new());
        self.failures.insert(id);
        self
    }

    pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl BlobStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<BlobObject, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let id = (bucket.to_string(), key.to_string());
        if self.failures.contains(&id) {
            return Err(StoreError::Io(std::io::Error::other("injected read failure")));
        }
        match self.objects.get(&id) {
            Some(content) => Ok(BlobObject {
                content: content.clone(),
                metadata: Default::default(),
            }),
            None => Err(StoreError::not_found(bucket, key)),
        }
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let keys: Vec<&String> = self
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .filter(|(_, k)| continuation.is_none_or(|token| k.as_str() > token))
            .map(|(_, k)| k)
            .collect();

        let page_size = self.page_size.unwrap_or(usize::MAX);
        let page: Vec<ObjectSummary> = keys
            .iter()
            .take(page_size)
            .map(|k| ObjectSummary {
                key: k.to_string(),
                size: self.objects[&(bucket.to_string(), k.to_string())].len() as u64,
            })
            .collect();
        let next_token = (keys.len() > page.len()).then(|| page[page.len() - 1].key.clone());

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }
}

pub(crate) struct MockOracle {
    responses: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockOracle {
    pub(crate) fn replying(texts: &[&str]) -> Self {
        Self {
            responses: Mutex::new(texts.iter().map(|t| Ok(t.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(error: OracleError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(error)])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn captured_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl TextOracle for MockOracle {
    async fn generate(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(OracleError::RateLimited))
    }
}
