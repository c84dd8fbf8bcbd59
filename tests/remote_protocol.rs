//! End to end tests of the remote control protocol over TCP.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use ffu_controld::{
    app_context::AppState,
    config::{BusCfg, BusKind, Config, ConfigManager},
    event::{Event, EventBus},
    protocol::{CommandHandler, RemoteProtocolServer},
};
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Daemon {
    state: Arc<AppState>,
    address: SocketAddr,
    event_bus: EventBus,
    cancel_token: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Daemon {
    async fn start(storage: &TempDir) -> Self {
        let mut config = Config::default();
        config.storage.directory = storage.path().to_path_buf();
        config.buses = vec![BusCfg {
            id: 1,
            kind: BusKind::Simulated,
        }];
        let config_manager = ConfigManager::new(config, PathBuf::from("/tmp/ffu_controld-it.yml"));
        let state = Arc::new(AppState::new(config_manager).await.unwrap());

        let event_bus = EventBus::new();
        let handler = CommandHandler::new(state.registry.clone()).with_event_bus(event_bus.clone());
        let server = RemoteProtocolServer::bind("127.0.0.1:0", handler)
            .await
            .unwrap()
            .with_event_bus(event_bus.clone());
        let address = server.local_addr().unwrap();

        let cancel_token = CancellationToken::new();
        let server = tokio::spawn(server.run(cancel_token.clone()));

        Self {
            state,
            address,
            event_bus,
            cancel_token,
            server,
        }
    }

    async fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.address).await.unwrap();
        let mut client = Client {
            framed: Framed::new(stream, LinesCodec::new()),
        };
        assert_eq!(client.read_line().await, "Hello");
        client
    }

    async fn stop(self) {
        self.cancel_token.cancel();
        timeout(TIMEOUT, self.server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn read_line(&mut self) -> String {
        timeout(TIMEOUT, self.framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    async fn request(&mut self, line: &str, replies: usize) -> Vec<String> {
        self.framed.send(line).await.unwrap();
        let mut lines = Vec::with_capacity(replies);
        for _ in 0..replies {
            lines.push(self.read_line().await);
        }
        lines
    }
}

#[tokio::test]
async fn add_and_list_devices() {
    let storage = TempDir::new().unwrap();
    let daemon = Daemon::start(&storage).await;
    let mut client = daemon.connect().await;

    for id in [12, 4] {
        assert_eq!(
            client.request(&format!("add-ffu --bus=1 --id={id}"), 3).await,
            vec![
                "Not implemented yet. Running in echo mode.".to_string(),
                format!("add-ffu bus=1 id={id}"),
                format!("OK[FFUdatabase]: Added FFU #{id}"),
            ]
        );
    }

    assert_eq!(
        client.request("list", 2).await,
        vec!["FFU id=12 busID=1 rpm=0", "FFU id=4 busID=1 rpm=0"]
    );

    daemon.stop().await;
}

#[tokio::test]
async fn add_without_bus_is_rejected() {
    let storage = TempDir::new().unwrap();
    let daemon = Daemon::start(&storage).await;
    let mut client = daemon.connect().await;

    assert_eq!(
        client.request("add-ffu --id=5", 2).await,
        vec![
            "Not implemented yet. Running in echo mode.",
            "Error[Commandparser]: parameter \"bus\" not specified. Abort.",
        ]
    );
    // The connection stays usable after an error.
    assert_eq!(
        client.request("bogus", 1).await,
        vec!["ERROR: Command not supported: bogus"]
    );
    assert!(daemon.state.registry.read().await.is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn devices_survive_restart() {
    let storage = TempDir::new().unwrap();
    let daemon = Daemon::start(&storage).await;
    let mut client = daemon.connect().await;
    client.request("add-ffu --bus=1 --id=9", 3).await;
    client.request("add-ffu --bus=1 --id=2", 3).await;
    drop(client);
    daemon.stop().await;

    let daemon = Daemon::start(&storage).await;
    let mut client = daemon.connect().await;

    assert_eq!(
        client.request("list", 2).await,
        vec!["FFU id=2 busID=1 rpm=0", "FFU id=9 busID=1 rpm=0"]
    );

    daemon.stop().await;
}

#[tokio::test]
async fn events_for_added_device_and_disconnect() {
    let storage = TempDir::new().unwrap();
    let daemon = Daemon::start(&storage).await;
    let mut events = daemon.event_bus.subscribe();
    let mut client = daemon.connect().await;

    client.request("add-ffu --bus=1 --id=3", 3).await;
    assert_eq!(
        timeout(TIMEOUT, events.recv()).await.unwrap().unwrap(),
        Event::DeviceAdded(3)
    );

    drop(client);
    let closed = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(closed, Event::ConnectionClosed(_)));

    daemon.stop().await;
}
