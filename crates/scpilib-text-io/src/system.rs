//! Built-in nodes every dispatcher installs.
//!
//! ```text
//! DATAFormat                       ASCII | QUADRUPLE | DOUBLE | SINGLE | HALF
//! SYSTem:LOCK[:OWNEr]?             owner of the system lock, or NONE
//! SYSTem:LOCK:REQUest?[<secs>]     1 if granted, 0 if held by another client
//! SYSTem:LOCK:RELEase?             1 if released, 0 if not the owner
//! SYSTem:WLOCk:...                 the same for the write lock, if enabled
//! ```
//!
//! The lock leaves are lock-exempt so a locked-out client can still see who
//! holds a lock and compete for it once it expires.

use std::sync::Arc;

use scpilib_core::error::{Error, Result};
use scpilib_core::{AccessLock, Attribute, Branch, Value};

use crate::codec::{DataFormat, DataFormatSetting};

/// Answer of `OWNEr?` when a lock is free.
pub const NO_OWNER: &str = "NONE";

pub(crate) fn install(
    root: &mut Branch,
    system_lock: &Arc<AccessLock>,
    write_lock: Option<&Arc<AccessLock>>,
    data_format: &Arc<DataFormatSetting>,
) -> Result<()> {
    install_data_format(root, data_format)?;

    let system = root.add_component("SYSTem")?;
    install_lock(system.add_component("LOCK")?, system_lock)?;
    if let Some(write_lock) = write_lock {
        install_lock(system.add_component("WLOCk")?, write_lock)?;
    }
    Ok(())
}

fn install_data_format(root: &mut Branch, setting: &Arc<DataFormatSetting>) -> Result<()> {
    let read = Arc::clone(setting);
    let write = Arc::clone(setting);
    root.add_attribute(
        Attribute::new("DATAFormat")
            .read(move |_| Ok(Value::from(read.get().name())))
            .write(move |_, arg| {
                let format: DataFormat = arg.parse().map_err(|e| Error::Callback(format!("{e}")))?;
                write.set(format);
                Ok(Value::None)
            })
            .allowed_values(DataFormat::ALL.map(DataFormat::name)),
    )?;
    Ok(())
}

fn install_lock(branch: &mut Branch, lock: &Arc<AccessLock>) -> Result<()> {
    let owner = Arc::clone(lock);
    branch.add_attribute(
        Attribute::new("OWNEr")
            .read(move |_| {
                Ok(owner
                    .owner()
                    .map_or_else(|| Value::from(NO_OWNER), |id| Value::from(id.as_str())))
            })
            .default()
            .lock_exempt(),
    )?;

    let request = Arc::clone(lock);
    branch.add_attribute(
        Attribute::new("REQUest")
            .read(move |ctx| Ok(Value::Bool(request.request_with(ctx.client, ctx.params)?)))
            .lock_exempt(),
    )?;

    let release = Arc::clone(lock);
    branch.add_attribute(
        Attribute::new("RELEase")
            .read(move |ctx| Ok(Value::Bool(release.release(ctx.client))))
            .lock_exempt(),
    )?;
    Ok(())
}
