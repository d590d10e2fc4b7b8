//! A demo instrument topology.
//!
//! ```text
//! SOURce:CURRent:UPPEr     integer, initially 7
//! SOURce:CURRent:LOWEr     integer, initially 0
//! SOURce:VOLTage           one of LOW | MID | HIGH, initially MID
//! CHANnel01..04            MEASure (default, reads <index> + 0.5), FUNCtion
//! WAVEform?[<n>]           ramp of 5 samples (or n samples)
//! *IDN?                    IDENTITY
//! *RST                     restore the initial state
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use scpilib_core::error::Error;
use scpilib_core::{Attribute, Branch, Result, SpecialCommand, SpecialCommands, Value};

/// What `*IDN?` answers.
pub const IDENTITY: &str = "scpilib,demo-instrument,0,0.1.0";

const CHANNELS: usize = 4;

/// The mutable state behind the demo instrument's leaves.
#[derive(Debug)]
pub struct DemoState {
    /// `SOURce:CURRent:UPPEr`.
    pub upper: Mutex<i64>,
    /// `SOURce:CURRent:LOWEr`.
    pub lower: Mutex<i64>,
    /// `SOURce:VOLTage`.
    pub voltage: Mutex<String>,
    /// `CHANnelNN:FUNCtion`, indexed from channel 1.
    pub functions: Mutex<[String; CHANNELS]>,
    /// Number of `*RST` commands processed.
    pub resets: Mutex<u32>,
}

impl Default for DemoState {
    fn default() -> Self {
        DemoState {
            upper: Mutex::new(7),
            lower: Mutex::new(0),
            voltage: Mutex::new("MID".into()),
            functions: Mutex::new(std::array::from_fn(|_| "VOLT".to_string())),
            resets: Mutex::new(0),
        }
    }
}

impl DemoState {
    fn reset(&self) {
        let fresh = DemoState::default();
        *self.upper.lock() = fresh.upper.into_inner();
        *self.lower.lock() = fresh.lower.into_inner();
        *self.voltage.lock() = fresh.voltage.into_inner();
        *self.functions.lock() = fresh.functions.into_inner();
        *self.resets.lock() += 1;
    }
}

/// The demo topology together with the state it operates on.
pub struct DemoInstrument {
    /// The command tree root.
    pub root: Branch,
    /// `*IDN` and `*RST`.
    pub specials: SpecialCommands,
    /// Shared instrument state, for assertions.
    pub state: Arc<DemoState>,
}

fn parse_int(arg: &str) -> Result<i64> {
    arg.parse()
        .map_err(|_| Error::Callback(format!("not an integer: {arg:?}")))
}

fn int_cell(
    name: &str,
    state: &Arc<DemoState>,
    cell: fn(&DemoState) -> &Mutex<i64>,
) -> Attribute {
    let (r, w) = (Arc::clone(state), Arc::clone(state));
    Attribute::new(name)
        .read(move |_| Ok(Value::Int(*cell(&r).lock())))
        .write(move |_, arg| {
            *cell(&w).lock() = parse_int(arg)?;
            Ok(Value::None)
        })
}

/// Build the demo instrument.
pub fn demo_instrument() -> Result<DemoInstrument> {
    let state = Arc::new(DemoState::default());
    let mut root = Branch::root();

    let source = root.add_component("SOURce")?;
    let current = source.add_component("CURRent")?;
    current
        .add_attribute(int_cell("UPPEr", &state, |s| &s.upper))?;
    current
        .add_attribute(int_cell("LOWEr", &state, |s| &s.lower))?;

    let (r, w) = (Arc::clone(&state), Arc::clone(&state));
    source
        .add_attribute(
            Attribute::new("VOLTage")
                .read(move |_| Ok(Value::Text(r.voltage.lock().clone())))
                .write(move |_, arg| {
                    *w.voltage.lock() = arg.to_string();
                    Ok(Value::None)
                })
                .allowed_values(["LOW", "MID", "HIGH"]),
        )?;

    let channel = root.add_channel("CHANnel", CHANNELS as u32, 1)?;
    channel
        .add_attribute(
            Attribute::new("MEASure")
                .read(|ctx| {
                    let index = ctx.channels.first().copied().unwrap_or_default();
                    Ok(Value::Float(f64::from(index) + 0.5))
                })
                .default(),
        )?;
    let (r, w) = (Arc::clone(&state), Arc::clone(&state));
    channel
        .add_attribute(
            Attribute::new("FUNCtion")
                .read(move |ctx| {
                    let slot = channel_slot(ctx.channels)?;
                    Ok(Value::Text(r.functions.lock()[slot].clone()))
                })
                .write(move |ctx, arg| {
                    let slot = channel_slot(ctx.channels)?;
                    w.functions.lock()[slot] = arg.to_string();
                    Ok(Value::None)
                }),
        )?;

    root.add_attribute(Attribute::new("WAVEform").read(|ctx| {
        let n = match ctx.params {
            Some(p) => p
                .parse::<usize>()
                .map_err(|_| Error::Callback(format!("bad sample count {p:?}")))?,
            None => 5,
        };
        Ok(Value::Array((0..n).map(|i| i as f64 * 0.5).collect()))
    }))?;

    let mut specials = SpecialCommands::new();
    specials
        .add(SpecialCommand::new("IDN?").read(|_| Ok(Value::from(IDENTITY))))?;
    let reset = Arc::clone(&state);
    specials
        .add(SpecialCommand::new("RST").write(move |_, _| {
            reset.reset();
            Ok(Value::None)
        }))?;

    Ok(DemoInstrument {
        root,
        specials,
        state,
    })
}

fn channel_slot(channels: &[u8]) -> Result<usize> {
    channels
        .first()
        .and_then(|&index| usize::from(index).checked_sub(1))
        .filter(|&slot| slot < CHANNELS)
        .ok_or_else(|| Error::ChannelMismatch("CHANnel".into()))
}
