//! Client-side proxies for QEMU's `org.qemu.Display1` export

use zbus::proxy;

/// Object path of console `id`
pub fn console_path(id: u32) -> String {
    format!("/org/qemu/Display1/Console_{}", id)
}

/// Proxy for org.qemu.Display1.VM
#[proxy(
    interface = "org.qemu.Display1.VM",
    default_service = "org.qemu",
    default_path = "/org/qemu/Display1/VM"
)]
pub trait Vm {
    #[zbus(property)]
    fn name(&self) -> zbus::Result<String>;

    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> zbus::Result<String>;

    #[zbus(property, name = "ConsoleIDs")]
    fn console_ids(&self) -> zbus::Result<Vec<u32>>;

    #[zbus(property)]
    fn interfaces(&self) -> zbus::Result<Vec<String>>;
}

/// Proxy for org.qemu.Display1.Console
#[proxy(interface = "org.qemu.Display1.Console", default_service = "org.qemu")]
pub trait Console {
    /// Hand the VM one end of a socket pair to push display updates on
    fn register_listener(&self, listener: zbus::zvariant::Fd<'_>) -> zbus::Result<()>;

    #[zbus(property)]
    fn label(&self) -> zbus::Result<String>;

    /// "Graphic" or "Text"
    #[zbus(property, name = "Type")]
    fn kind(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn width(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn height(&self) -> zbus::Result<u32>;

    #[zbus(property)]
    fn interfaces(&self) -> zbus::Result<Vec<String>>;
}
