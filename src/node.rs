//! ==============================================================================
//! node.rs - builds the task set from a NodeConfig
//! ==============================================================================
//!
//! purpose:
//!     the only place that maps configuration tags to concrete types. every
//!     task gets the shared store handed in at construction.
//!
//! startup rules:
//!     - unknown sensor type: logged, that sensor skipped
//!     - two sensors on one pin: logged, the later one skipped
//!     - two sensors on one bus: each opens a device nobody else holds
//!     - unknown display type, bad i2c pins/address, bad template: fatal
//!     - http listen failure: fatal
//!
//! relationships:
//!     - reads: config.rs
//!     - builds: sensor::SensorTask, display::DisplayRenderer,
//!       httpd::HttpResponder
//!     - registers into: runtime::Scheduler
//!
//! ==============================================================================

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use crate::config::{Dimensions, DisplayConfig, NodeConfig, SensorEntry};
use crate::display::format::{SensorFormat, Template};
use crate::display::lcd::CharLcd;
use crate::display::ssd1306::Ssd1306;
use crate::display::{Display, DisplayKind, DisplayRenderer};
use crate::error::ConfigError;
use crate::hal::{self, Hal};
use crate::httpd::HttpResponder;
use crate::runtime::{RestartPolicy, Scheduler};
use crate::sensor::{open_driver, DeviceClaims, DriverOpener, SensorKind, SensorTask};
use crate::store::SharedStateStore;

/// Everything `main` needs to start the node.
pub struct Node {
    pub scheduler: Scheduler,
    /// where the http responder actually listens, if enabled
    pub http_addr: Option<SocketAddr>,
}

/// Must be called inside a tokio runtime (the listener is bound here).
pub fn assemble(config: &NodeConfig, store: &SharedStateStore) -> anyhow::Result<Node> {
    let policy = config.supervision.policy();
    let mut scheduler = Scheduler::new();

    let sensors = register_sensors(&mut scheduler, config, store, policy);

    if let Some(display) = &config.display {
        let renderer = build_display(display, &sensors, store)?;
        scheduler.register(renderer, policy);
    }

    let mut http_addr = None;
    if let Some(httpd) = &config.httpd {
        let ip: IpAddr = httpd
            .listen_address
            .parse()
            .with_context(|| format!("invalid httpd.listen_address '{}'", httpd.listen_address))?;
        let responder = HttpResponder::bind(
            SocketAddr::new(ip, httpd.port),
            httpd.backlog,
            store.clone(),
            httpd.request_timeout(),
        )
        .with_context(|| format!("binding http responder to {}:{}", httpd.listen_address, httpd.port))?;
        http_addr = Some(responder.local_addr()?);
        scheduler.register(responder, policy);
    }

    Ok(Node {
        scheduler,
        http_addr,
    })
}

/// Registers one task per usable sensor and returns those sensors, in
/// configuration order. Skipped sensors never reach the display.
fn register_sensors(
    scheduler: &mut Scheduler,
    config: &NodeConfig,
    store: &SharedStateStore,
    policy: RestartPolicy,
) -> Vec<(String, SensorEntry)> {
    let claims = DeviceClaims::new();
    let mut registered = Vec::new();
    let mut pin_owners: HashMap<u8, &str> = HashMap::new();
    for (name, entry) in &config.sensors {
        let kind = match SensorKind::parse_for(name, &entry.kind) {
            Ok(kind) => kind,
            Err(e) => {
                error!(error = %e, "configuration error, sensor skipped");
                continue;
            }
        };
        if let Some(owner) = pin_owners.get(&entry.pin) {
            let e = ConfigError::PinInUse {
                name: name.clone(),
                pin: entry.pin,
                owner: owner.to_string(),
            };
            error!(error = %e, "configuration error, sensor skipped");
            continue;
        }
        pin_owners.insert(entry.pin, name);

        let mut timing = kind.timing();
        if let Some(ms) = entry.interval_ms {
            timing.poll_interval = Duration::from_millis(ms);
        }
        info!(sensor = %name, %kind, pin = entry.pin, ?timing, "sensor configured");
        let opener = opener(kind, name, entry, config, &claims);
        let task = SensorTask::new(name.clone(), kind, timing, store.clone(), opener);
        scheduler.register(task, policy);
        registered.push((name.clone(), entry.clone()));
    }
    registered
}

fn opener(
    kind: SensorKind,
    name: &str,
    entry: &SensorEntry,
    config: &NodeConfig,
    claims: &DeviceClaims,
) -> DriverOpener {
    let name = name.to_string();
    let pin = entry.pin;
    let device = entry.device.clone();
    let roots = config.paths.roots();
    let claims = claims.clone();
    Box::new(move || open_driver(kind, pin, device.as_deref(), &roots, &claims, &name))
}

/// Per-sensor formats in configuration order. Templates are checked here
/// so a typo fails startup instead of every render.
pub fn display_layout(sensors: &[(String, SensorEntry)]) -> Result<Vec<(String, SensorFormat)>, ConfigError> {
    sensors
        .iter()
        .map(|(name, entry)| {
            let format = match &entry.format {
                Some(template) => SensorFormat::Template(Template::parse(template)?),
                None => SensorFormat::Units,
            };
            Ok((name.clone(), format))
        })
        .collect()
}

fn build_display(
    config: &DisplayConfig,
    sensors: &[(String, SensorEntry)],
    store: &SharedStateStore,
) -> anyhow::Result<DisplayRenderer> {
    let kind: DisplayKind = config.kind.parse()?;
    let bus = hal::bus_for_pins(config.pin.scl, config.pin.sda)?;
    let address = config.address.resolve()?;
    let layout = display_layout(sensors)?;

    let i2c = Hal::open(bus)?;
    let Dimensions { width, height } = config.dimensions;
    let panel: Box<dyn Display> = match kind {
        DisplayKind::I2cLcd => Box::new(
            CharLcd::new(i2c, address, width as usize, height as usize)
                .with_context(|| format!("initialising lcd at 0x{address:02X} on i2c bus {bus}"))?,
        ),
        DisplayKind::Ssd1306 => Box::new(
            Ssd1306::new(i2c, address, width, height)
                .with_context(|| format!("initialising ssd1306 at 0x{address:02X} on i2c bus {bus}"))?,
        ),
    };
    info!(?kind, bus, address, width, height, "display ready");

    Ok(DisplayRenderer::new(
        panel,
        store.clone(),
        layout,
        Duration::from_millis(config.interval_ms),
    ))
}
