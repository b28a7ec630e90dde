use super::{CdnService, ObjectProperties};
use crate::models::ContentSource;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

/// In-memory object store with call counters and failure injection.
#[derive(Clone)]
pub struct MockCdnClient {
    container: String,
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    container_ready: Arc<Mutex<bool>>,
    ensure_count: Arc<Mutex<usize>>,
    put_count: Arc<Mutex<usize>>,
    delete_count: Arc<Mutex<usize>>,
    fail_puts: Arc<Mutex<bool>>,
    fail_deletes: Arc<Mutex<bool>>,
    latency: Option<Duration>,
}

impl MockCdnClient {
    pub fn new() -> Self {
        Self {
            container: "mock-media".to_string(),
            objects: Arc::new(Mutex::new(HashMap::new())),
            container_ready: Arc::new(Mutex::new(false)),
            ensure_count: Arc::new(Mutex::new(0)),
            put_count: Arc::new(Mutex::new(0)),
            delete_count: Arc::new(Mutex::new(0)),
            fail_puts: Arc::new(Mutex::new(false)),
            fail_deletes: Arc::new(Mutex::new(false)),
            latency: None,
        }
    }

    pub fn with_container(mut self, container: String) -> Self {
        self.container = container;
        self
    }

    pub fn with_object(self, key: String, content: Vec<u8>) -> Self {
        self.objects.lock().unwrap().insert(
            key,
            StoredObject {
                data: content,
                content_type: "application/octet-stream".to_string(),
                cache_control: None,
            },
        );
        self
    }

    pub fn with_failing_puts(self, fail: bool) -> Self {
        *self.fail_puts.lock().unwrap() = fail;
        self
    }

    pub fn with_failing_deletes(self, fail: bool) -> Self {
        *self.fail_deletes.lock().unwrap() = fail;
        self
    }

    /// Delay every store call, simulating a network round-trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_failing_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }

    pub fn set_failing_deletes(&self, fail: bool) {
        *self.fail_deletes.lock().unwrap() = fail;
    }

    pub fn is_container_ready(&self) -> bool {
        *self.container_ready.lock().unwrap()
    }

    pub fn get_ensure_count(&self) -> usize {
        *self.ensure_count.lock().unwrap()
    }

    pub fn get_put_count(&self) -> usize {
        *self.put_count.lock().unwrap()
    }

    pub fn get_delete_count(&self) -> usize {
        *self.delete_count.lock().unwrap()
    }

    pub fn get_object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn get_objects(&self) -> HashMap<String, StoredObject> {
        self.objects.lock().unwrap().clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockCdnClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CdnService for MockCdnClient {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<()> {
        *self.ensure_count.lock().unwrap() += 1;
        *self.container_ready.lock().unwrap() = true;
        Ok(())
    }

    async fn put_object(&self, key: &str, body: &ContentSource, content_type: &str) -> Result<()> {
        self.simulate_latency().await;
        *self.put_count.lock().unwrap() += 1;

        if *self.fail_puts.lock().unwrap() {
            return Err(Error::Storage(format!("Mock put failure for {}", key)));
        }

        let data = body.read_all().await?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                cache_control: None,
            },
        );
        Ok(())
    }

    async fn set_properties(&self, key: &str, properties: &ObjectProperties) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        match objects.get_mut(key) {
            Some(object) => {
                object.content_type = properties.content_type.clone();
                object.cache_control = Some(properties.cache_control.clone());
                Ok(())
            }
            None => Err(Error::Storage(format!("Object not found: {}", key))),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<bool> {
        self.simulate_latency().await;
        *self.delete_count.lock().unwrap() += 1;

        if *self.fail_deletes.lock().unwrap() {
            return Err(Error::Storage(format!("Mock delete failure for {}", key)));
        }

        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}
