//! Command table of the remote protocol.
//!
//! Every request produces zero or more reply lines (without line
//! terminators). Errors never close the connection: they are reported as
//! reply text and processing continues with the next line.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::RwLock;

use crate::{
    bus::BusId,
    device::{DeviceId, Property},
    error::ControlError,
    event::{Event, EventBus},
    registry::DeviceRegistry,
};

use super::parser::Request;

pub const GREETING: &str = "Hello";

pub const ECHO_NOTICE: &str = "Not implemented yet. Running in echo mode.";

const SYNTAX_ERROR: &str = "ERROR: key_value_pair length invalid";

const HELP: &[&str] = &[
    "This is the commandset of the openFFUcontrol remote unit:",
    "",
    "<COMMAND> [--key[=value]]",
    "",
    "COMMANDS:",
    "    list",
    "        Show the list of currently configured ffus from the controller database.",
    "",
    "    add-ffu --bus=BUSNR --id=ID",
    "        Add a new ffu to the controller database.",
    "",
    "    broadcast --bus=BUSNR --speed=SPEED",
    "        Broadcast data to all buses and all units.",
    "",
    "    dci-address --bus=BUSNR --startAdr=ADDRESS",
    "        Start daisy-chain addressing of bus-line BUSNR.",
    "",
    "    raw-set --bus=BUSNR --KEY=VALUE",
    "",
    "    raw-get --bus=BUSNR --KEY1 [--KEY2 ...]",
    "",
    "    set --id=ID --KEY=VALUE",
    "",
    "    get --id=ID --KEY",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    List,
    AddFfu,
    Broadcast,
    DciAddress,
    RawSet,
    RawGet,
    Set,
    Get,
    Unsupported(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name {
            "help" => Command::Help,
            "list" => Command::List,
            "add-ffu" => Command::AddFfu,
            "broadcast" => Command::Broadcast,
            "dci-address" => Command::DciAddress,
            "raw-set" => Command::RawSet,
            "raw-get" => Command::RawGet,
            "set" => Command::Set,
            "get" => Command::Get,
            other => Command::Unsupported(other.to_string()),
        }
    }

    /// Keys echoed back by the placeholder commands, in reply order.
    fn echo_keys(&self) -> &'static [&'static str] {
        match self {
            Command::Broadcast => &["bus", "speed"],
            Command::DciAddress => &["bus", "startAdr"],
            Command::RawSet | Command::RawGet => &["bus"],
            Command::Set | Command::Get => &["id"],
            _ => &[],
        }
    }
}

fn parser_error(error: &ControlError) -> String {
    format!("Error[Commandparser]: {error}. Abort.")
}

fn database_error(error: &ControlError) -> String {
    format!("Error[FFUdatabase]: {error}. Abort.")
}

/// Executes requests against the shared registry.
#[derive(Clone)]
pub struct CommandHandler {
    registry: Arc<RwLock<DeviceRegistry>>,
    event_bus: Option<EventBus>,
}

impl CommandHandler {
    pub fn new(registry: Arc<RwLock<DeviceRegistry>>) -> Self {
        Self {
            registry,
            event_bus: None,
        }
    }

    /// Publishes [`Event::DeviceAdded`] for every device created by `add-ffu`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Processes one request line and returns the reply lines.
    pub async fn handle_line(&self, line: &str) -> Vec<String> {
        let request = Request::parse(line);
        let mut replies: Vec<String> = request
            .syntax_errors()
            .map(|e| {
                debug!("Skipping token: {e}");
                SYNTAX_ERROR.to_string()
            })
            .collect();

        let command = Command::from_name(&request.command);
        match &command {
            Command::Help => replies.extend(HELP.iter().map(|line| line.to_string())),
            Command::List => self.list(&mut replies).await,
            Command::AddFfu => self.add_ffu(&request, &mut replies).await,
            Command::Unsupported(name) => {
                replies.push(format!("ERROR: Command not supported: {name}"));
            }
            placeholder => echo(&request, placeholder, &mut replies),
        }

        replies
    }

    async fn list(&self, replies: &mut Vec<String>) {
        let registry = self.registry.read().await;
        replies.extend(registry.list().iter().map(|device| {
            format!(
                "FFU id={} busID={} rpm={}",
                Property::Id.read(device),
                Property::BusId.read(device),
                Property::Rpm.read(device),
            )
        }));
    }

    async fn add_ffu(&self, request: &Request, replies: &mut Vec<String>) {
        replies.push(ECHO_NOTICE.to_string());

        let bus = match request.require("bus") {
            Ok(bus) => bus,
            Err(e) => return replies.push(parser_error(&e)),
        };
        let Some(id) = request
            .params
            .get("id")
            .and_then(|id| id.parse::<DeviceId>().ok())
        else {
            return replies.push(String::from(
                "Error[Commandparser]: parameter \"id\" not specified or id can not be parsed. Abort.",
            ));
        };
        replies.push(format!("add-ffu bus={bus} id={id}"));

        let mut registry = self.registry.write().await;
        let device = match registry.add(id) {
            Ok(device) => device,
            Err(e) => return replies.push(database_error(&e)),
        };
        if let Ok(bus_id) = bus.parse::<BusId>() {
            device.set_bus_id(Some(bus_id));
        }
        replies.push(format!("OK[FFUdatabase]: Added FFU #{id}"));

        for property in Property::ALL.into_iter().filter(|p| p.is_writable()) {
            let Some(value) = request.params.get(property.name()) else {
                continue;
            };
            if let Err(e) = registry.set_property(id, property, value) {
                replies.push(format!("Error[FFUdatabase]: FFU #{id}: {e}."));
            }
        }
        drop(registry);

        info!("FFU #{id} added on bus {bus} by remote client");
        if let Some(event_bus) = &self.event_bus {
            if event_bus.publish(Event::DeviceAdded(id)).is_err() {
                debug!("No subscriber for DeviceAdded({id})");
            }
        }
    }
}

fn echo(request: &Request, command: &Command, replies: &mut Vec<String>) {
    replies.push(ECHO_NOTICE.to_string());

    let mut echoed = vec![request.command.clone()];
    for key in command.echo_keys() {
        match request.require(key) {
            Ok(value) => echoed.push(format!("{key}={value}")),
            Err(e) => return replies.push(parser_error(&e)),
        }
    }
    replies.push(echoed.join(" "));
}
