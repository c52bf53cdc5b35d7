//! D-Bus side of the viewer: discovering the VM and attaching to a console

use anyhow::{Context, Result, bail};
use std::time::Duration;
use zbus::{Connection, connection};

pub mod listener;
pub mod proxy;
pub mod registration;

use listener::SharedDispatcher;
use proxy::{ConsoleProxy, VmProxy};
use registration::RegistrationError;

/// Connection to a VM's `org.qemu.Display1` export
pub struct VmConnection {
    conn: Connection,
    name: String,
    uuid: String,
    console_ids: Vec<u32>,
    interfaces: Vec<String>,
}

impl VmConnection {
    /// Connect to the bus QEMU exports on (session bus unless `address` is set)
    pub async fn connect(address: Option<&str>) -> Result<Self> {
        let conn = match address {
            Some(address) => {
                // listener fds and dmabufs travel as unix fds
                if !address.starts_with("unix:") {
                    bail!("D-Bus address {:?} cannot carry file descriptors", address);
                }
                connection::Builder::address(address)
                    .context("Invalid D-Bus address")?
                    .build()
                    .await
                    .with_context(|| format!("Failed to connect to D-Bus at {}", address))?
            }
            None => Connection::session()
                .await
                .context("Failed to connect to D-Bus session bus")?,
        };

        tracing::info!("Connected to D-Bus");

        let vm = VmProxy::new(&conn)
            .await
            .context("Failed to create VM proxy")?;

        let name = vm.name().await.context("Failed to read VM name")?;
        let uuid = vm.uuid().await.context("Failed to read VM UUID")?;
        let console_ids = vm
            .console_ids()
            .await
            .context("Failed to read VM console IDs")?;
        let interfaces = vm
            .interfaces()
            .await
            .context("Failed to read VM interfaces")?;

        Ok(Self {
            conn,
            name,
            uuid,
            console_ids,
            interfaces,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn console_ids(&self) -> &[u32] {
        &self.console_ids
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Open the `index`-th console of the VM
    pub async fn console(&self, index: u32) -> Result<Console> {
        let id = console_id(&self.console_ids, index)?;
        Console::open(&self.conn, id).await
    }
}

fn console_id(console_ids: &[u32], index: u32) -> Result<u32> {
    match console_ids.get(index as usize) {
        Some(id) => Ok(*id),
        None if console_ids.is_empty() => bail!("VM exposes no consoles"),
        None => bail!(
            "Console {} does not exist, max is {}",
            index,
            console_ids.len() - 1
        ),
    }
}

/// One display console of the VM
pub struct Console {
    proxy: ConsoleProxy<'static>,
    id: u32,
    label: String,
    kind: String,
    width: u32,
    height: u32,
    interfaces: Vec<String>,
}

impl Console {
    async fn open(conn: &Connection, id: u32) -> Result<Self> {
        let proxy = ConsoleProxy::builder(conn)
            .path(proxy::console_path(id))
            .context("Invalid console path")?
            .build()
            .await
            .context("Failed to create console proxy")?;

        let label = proxy.label().await.context("Failed to read console label")?;
        let kind = proxy.kind().await.context("Failed to read console type")?;
        let width = proxy.width().await.context("Failed to read console width")?;
        let height = proxy
            .height()
            .await
            .context("Failed to read console height")?;
        let interfaces = proxy
            .interfaces()
            .await
            .context("Failed to read console interfaces")?;

        Ok(Self {
            proxy,
            id,
            label,
            kind,
            width,
            height,
            interfaces,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Attach `dispatcher` as this console's display listener
    pub async fn register_listener(
        &self,
        dispatcher: SharedDispatcher,
        timeout: Duration,
    ) -> Result<Connection, RegistrationError> {
        registration::register_listener(&self.proxy, dispatcher, timeout).await
    }
}
