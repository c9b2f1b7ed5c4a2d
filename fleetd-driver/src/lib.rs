//! Compute driver contract and simulated implementations (§4.G).
//!
//! The libvirt C binding, a real container runtime, and a real micro-VM
//! monitor are named out-of-scope external collaborators (§1); all three
//! driver variants here are simulated in-process, holding their instance
//! table behind a single call-serializing mutex (a real libvirt connection
//! handle is not reentrant, and the simulated driver preserves that calling
//! contract for the agent code above it), stub but contract-faithful.

use async_trait::async_trait;
use dashmap::DashMap;
use fleetd_core::instance::{Instance, InstanceState};
use fleetd_core::{DriverError, InstanceId, InstanceSpec, InstanceType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    LibvirtVm,
    ContainerRuntime,
    MicroVm,
}

#[derive(Debug, Clone, Default)]
pub struct InstanceStats {
    pub cpu_usage_percent: f64,
    pub memory_bytes_used: u64,
    pub disk_bytes_used: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct AttachOptions {
    pub tty: bool,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ConsoleMessage {
    Data { bytes: Vec<u8> },
    Resize { cols: u16, rows: u16 },
}

/// A bidirectional byte stream for `attach` (§4.H's `AttachConsole`):
/// `input` carries client messages in, `output` yields driver bytes out.
/// Closing either half terminates the session.
pub struct ConsoleSession {
    pub input: mpsc::Sender<ConsoleMessage>,
    pub output: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
pub trait ComputeDriver: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> DriverKind;

    async fn create(
        &self,
        id: InstanceId,
        name: String,
        instance_type: InstanceType,
        spec: InstanceSpec,
    ) -> DriverResult<Instance>;
    async fn start(&self, id: &InstanceId) -> DriverResult<()>;
    async fn stop(&self, id: &InstanceId, force: bool) -> DriverResult<()>;
    async fn restart(&self, id: &InstanceId, force: bool) -> DriverResult<()>;
    async fn delete(&self, id: &InstanceId) -> DriverResult<()>;
    async fn get(&self, id: &InstanceId) -> DriverResult<Instance>;
    async fn list(&self) -> DriverResult<Vec<Instance>>;
    async fn stats(&self, id: &InstanceId) -> DriverResult<InstanceStats>;
    async fn attach(&self, id: &InstanceId, opts: AttachOptions) -> DriverResult<ConsoleSession>;
    async fn close(&self) -> DriverResult<()>;
}

/// Shared simulation engine behind all three driver variants. One
/// `call_lock` serializes every call, matching the non-reentrant-connection
/// discipline real drivers require; the `instances` map is the actual state.
struct SimulatedDriver {
    instance_type: InstanceType,
    call_lock: Mutex<()>,
    instances: DashMap<InstanceId, Instance>,
    connected: AtomicBool,
}

impl SimulatedDriver {
    fn new(instance_type: InstanceType) -> Self {
        Self {
            instance_type,
            call_lock: Mutex::new(()),
            instances: DashMap::new(),
            connected: AtomicBool::new(true),
        }
    }

    fn ensure_connected(&self) -> DriverResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }

    async fn create(
        &self,
        id: InstanceId,
        name: String,
        instance_type: InstanceType,
        spec: InstanceSpec,
    ) -> DriverResult<Instance> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        if instance_type != self.instance_type {
            return Err(DriverError::InvalidSpec(format!(
                "driver only supports {:?}, got {:?}",
                self.instance_type, instance_type
            )));
        }
        if self.instances.contains_key(&id) {
            return Err(DriverError::AlreadyExists(id.0));
        }
        if spec.cpu_cores == 0 || spec.memory_bytes == 0 {
            return Err(DriverError::InvalidSpec(
                "cpu_cores and memory_bytes must be nonzero".into(),
            ));
        }

        let mut instance = Instance {
            schema_version: 1,
            id: id.clone(),
            name,
            instance_type,
            state: InstanceState::Creating,
            spec,
            node_id: None,
            ip_address: None,
            metadata: Default::default(),
            state_reason: None,
            created_at: chrono::Utc::now(),
            started_at: None,
        };
        self.instances.insert(id.clone(), instance.clone());

        // Simulated provisioning delay, then settle into `stopped`.
        tokio::time::sleep(Duration::from_millis(5)).await;
        instance
            .transition(InstanceState::Stopped, None)
            .map_err(|e| DriverError::OperationFailed(e.to_string()))?;
        self.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn start(&self, id: &InstanceId) -> DriverResult<()> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        let mut entry = self
            .instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(id.0.clone()))?;
        if entry.state == InstanceState::Running {
            return Ok(());
        }
        entry
            .transition(InstanceState::Running, None)
            .map_err(|e| DriverError::WrongState(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self, id: &InstanceId, force: bool) -> DriverResult<()> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        let mut entry = self
            .instances
            .get_mut(id)
            .ok_or_else(|| DriverError::NotFound(id.0.clone()))?;
        if entry.state == InstanceState::Stopped {
            return Ok(());
        }
        if !force {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        entry
            .transition(InstanceState::Stopped, None)
            .map_err(|e| DriverError::WrongState(e.to_string()))?;
        Ok(())
    }

    async fn restart(&self, id: &InstanceId, force: bool) -> DriverResult<()> {
        self.stop(id, force).await?;
        self.start(id).await
    }

    async fn delete(&self, id: &InstanceId) -> DriverResult<()> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        self.instances.remove(id);
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> DriverResult<Instance> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        self.instances
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| DriverError::NotFound(id.0.clone()))
    }

    async fn list(&self) -> DriverResult<Vec<Instance>> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        Ok(self.instances.iter().map(|e| e.value().clone()).collect())
    }

    async fn stats(&self, id: &InstanceId) -> DriverResult<InstanceStats> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        let entry = self
            .instances
            .get(id)
            .ok_or_else(|| DriverError::NotFound(id.0.clone()))?;
        let running = entry.state == InstanceState::Running;
        Ok(InstanceStats {
            cpu_usage_percent: if running { 12.5 } else { 0.0 },
            memory_bytes_used: if running { entry.spec.memory_bytes / 2 } else { 0 },
            disk_bytes_used: entry.spec.disks.iter().map(|d| d.size_bytes / 4).sum(),
            network_rx_bytes: 0,
            network_tx_bytes: 0,
        })
    }

    async fn attach(&self, id: &InstanceId, _opts: AttachOptions) -> DriverResult<ConsoleSession> {
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        if !self.instances.contains_key(id) {
            return Err(DriverError::NotFound(id.0.clone()));
        }
        // Simulated console: echoes data back, acknowledges resizes by
        // dropping them (no real pty backs this driver).
        let (input_tx, mut input_rx) = mpsc::channel::<ConsoleMessage>(32);
        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(32);
        tokio::spawn(async move {
            while let Some(msg) = input_rx.recv().await {
                if let ConsoleMessage::Data { bytes } = msg {
                    if output_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
            }
        });
        Ok(ConsoleSession {
            input: input_tx,
            output: output_rx,
        })
    }

    async fn close(&self) -> DriverResult<()> {
        let _guard = self.call_lock.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

macro_rules! simulated_driver_impl {
    ($name:ident, $kind:expr, $label:expr, $instance_type:expr) => {
        pub struct $name {
            inner: SimulatedDriver,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    inner: SimulatedDriver::new($instance_type),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        #[async_trait]
        impl ComputeDriver for $name {
            fn name(&self) -> &str {
                $label
            }

            fn kind(&self) -> DriverKind {
                $kind
            }

            async fn create(
                &self,
                id: InstanceId,
                name: String,
                instance_type: InstanceType,
                spec: InstanceSpec,
            ) -> DriverResult<Instance> {
                self.inner.create(id, name, instance_type, spec).await
            }

            async fn start(&self, id: &InstanceId) -> DriverResult<()> {
                self.inner.start(id).await
            }

            async fn stop(&self, id: &InstanceId, force: bool) -> DriverResult<()> {
                self.inner.stop(id, force).await
            }

            async fn restart(&self, id: &InstanceId, force: bool) -> DriverResult<()> {
                self.inner.restart(id, force).await
            }

            async fn delete(&self, id: &InstanceId) -> DriverResult<()> {
                self.inner.delete(id).await
            }

            async fn get(&self, id: &InstanceId) -> DriverResult<Instance> {
                self.inner.get(id).await
            }

            async fn list(&self) -> DriverResult<Vec<Instance>> {
                self.inner.list().await
            }

            async fn stats(&self, id: &InstanceId) -> DriverResult<InstanceStats> {
                self.inner.stats(id).await
            }

            async fn attach(
                &self,
                id: &InstanceId,
                opts: AttachOptions,
            ) -> DriverResult<ConsoleSession> {
                self.inner.attach(id, opts).await
            }

            async fn close(&self) -> DriverResult<()> {
                self.inner.close().await
            }
        }
    };
}

simulated_driver_impl!(LibvirtVmDriver, DriverKind::LibvirtVm, "libvirt-vm", InstanceType::Vm);
simulated_driver_impl!(
    ContainerRuntimeDriver,
    DriverKind::ContainerRuntime,
    "container-runtime",
    InstanceType::Container
);
simulated_driver_impl!(MicroVmDriver, DriverKind::MicroVm, "micro-vm", InstanceType::Microvm);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_spec() -> InstanceSpec {
        InstanceSpec {
            image_ref: "alpine:latest".into(),
            cpu_cores: 1,
            memory_bytes: 128 * 1024 * 1024,
            disks: vec![],
            command: vec![],
            env: HashMap::new(),
            kernel: None,
            initrd: None,
            network: None,
            limits: fleetd_core::node::Resources {
                cpu_cores: 1,
                memory_bytes: 128 * 1024 * 1024,
                disk_bytes: 0,
                gpu_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn create_then_start_then_stop_round_trips() {
        let driver = ContainerRuntimeDriver::new();
        let id = InstanceId("i1".into());
        let created = driver
            .create(id.clone(), "web".into(), InstanceType::Container, sample_spec())
            .await
            .unwrap();
        assert_eq!(created.state, InstanceState::Stopped);

        driver.start(&id).await.unwrap();
        assert_eq!(driver.get(&id).await.unwrap().state, InstanceState::Running);

        driver.stop(&id, true).await.unwrap();
        assert_eq!(driver.get(&id).await.unwrap().state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn start_is_noop_when_already_running() {
        let driver = ContainerRuntimeDriver::new();
        let id = InstanceId("i1".into());
        driver
            .create(id.clone(), "web".into(), InstanceType::Container, sample_spec())
            .await
            .unwrap();
        driver.start(&id).await.unwrap();
        driver.start(&id).await.unwrap();
        assert_eq!(driver.get(&id).await.unwrap().state, InstanceState::Running);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let driver = ContainerRuntimeDriver::new();
        let id = InstanceId("missing".into());
        driver.delete(&id).await.unwrap();
        driver.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let driver = ContainerRuntimeDriver::new();
        let err = driver.get(&InstanceId("nope".into())).await.unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[tokio::test]
    async fn wrong_instance_type_is_invalid_spec() {
        let driver = LibvirtVmDriver::new();
        let err = driver
            .create(
                InstanceId("i1".into()),
                "web".into(),
                InstanceType::Container,
                sample_spec(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn close_then_any_call_is_not_connected() {
        let driver = ContainerRuntimeDriver::new();
        driver.close().await.unwrap();
        let err = driver.list().await.unwrap_err();
        assert!(matches!(err, DriverError::NotConnected));
    }

    #[tokio::test]
    async fn attach_echoes_data_back() {
        let driver = ContainerRuntimeDriver::new();
        let id = InstanceId("i1".into());
        driver
            .create(id.clone(), "web".into(), InstanceType::Container, sample_spec())
            .await
            .unwrap();
        let mut session = driver
            .attach(&id, AttachOptions { tty: true, cols: 80, rows: 24 })
            .await
            .unwrap();
        session
            .input
            .send(ConsoleMessage::Data {
                bytes: b"hello".to_vec(),
            })
            .await
            .unwrap();
        let echoed = session.output.recv().await.unwrap();
        assert_eq!(echoed, b"hello");
    }
}
