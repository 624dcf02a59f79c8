use crate::{
    control::dbus_server::{forward_keyboard_changes, BacklightServer},
    external::backlight::{
        mock::MockBacklightService, BacklightChange, BacklightProperty, BacklightService,
        KeyboardId,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use zbus::dbus_proxy;

#[dbus_proxy(interface = "org.keylight.Backlight")]
trait Backlight {
    fn keyboards(&self) -> zbus::Result<Vec<u64>>;

    fn brightness(&self, keyboard: u64) -> zbus::Result<f64>;

    fn set_brightness(&self, keyboard: u64, level: f64) -> zbus::Result<bool>;

    fn is_built_in(&self, keyboard: u64) -> zbus::Result<bool>;

    fn state(&self, keyboard: u64) -> zbus::Result<(bool, bool, bool)>;

    #[dbus_proxy(signal)]
    fn backlight_changed(&self, keyboard: u64, property: &str) -> zbus::Result<()>;
}

async fn proxy_for(name: &'static str, path: &'static str) -> BacklightProxy<'static> {
    let connection = zbus::Connection::session().await.unwrap();
    BacklightProxy::builder(&connection)
        .destination(name)
        .unwrap()
        .path(path)
        .unwrap()
        .build()
        .await
        .unwrap()
}

#[tokio::test]
#[ignore = "needs a session bus"]
async fn test_requests() {
    let name = "org.keylight.TestRequests";
    let path = "/org/keylight/test_requests";
    let service = MockBacklightService::new()
        .with_keyboard(1, true)
        .with_keyboard(2, false);
    let server = BacklightServer::new(Some(name), Some(path), Arc::new(service.clone()));
    let handle = server.spawn().await.expect("Couldn't start server");

    let proxy = proxy_for(name, path).await;
    assert_eq!(proxy.keyboards().await.unwrap(), vec![1, 2]);
    assert!(proxy.is_built_in(1).await.unwrap());
    assert!(!proxy.is_built_in(2).await.unwrap());
    assert!(proxy.set_brightness(2, 0.25).await.unwrap());
    assert_eq!(service.brightness(KeyboardId(2)).await.unwrap(), 0.25);
    assert_eq!(proxy.brightness(2).await.unwrap(), 0.25);
    assert_eq!(proxy.state(2).await.unwrap(), (false, false, false));

    // Refused requests aren't D-Bus errors
    assert!(!proxy.set_brightness(2, 1.5).await.unwrap());
    assert!(!proxy.set_brightness(7, 0.5).await.unwrap());
    service.set_failure_mode(true);
    assert_eq!(proxy.brightness(1).await.unwrap(), 0.0);

    handle.await_shutdown().await;
    assert!(proxy.keyboards().await.is_err());
}

#[tokio::test]
#[ignore = "needs a session bus"]
async fn test_change_signals() {
    let name = "org.keylight.TestSignals";
    let path = "/org/keylight/test_signals";
    let service = MockBacklightService::new().with_keyboard(1, true);
    let server = BacklightServer::new(Some(name), Some(path), Arc::new(service.clone()));
    let handle = server.spawn().await.expect("Couldn't start server");

    let proxy = proxy_for(name, path).await;
    let mut signals = proxy.receive_backlight_changed().await.unwrap();
    service.set_brightness(KeyboardId(1), 0.5).await.unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(5), signals.next())
        .await
        .expect("No signal emitted")
        .unwrap();
    let args = signal.args().unwrap();
    assert_eq!(args.keyboard, 1);
    assert_eq!(args.property, "brightness");

    handle.await_shutdown().await;
}

async fn next_change(
    receiver: &mut mpsc::UnboundedReceiver<BacklightChange>,
) -> BacklightChange {
    tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("No change forwarded")
        .expect("Forwarding ended")
}

#[tokio::test]
async fn test_forwarding_follows_hotplug() {
    let service = MockBacklightService::new().with_keyboard(1, true);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handle = forward_keyboard_changes(Arc::new(service.clone()), sender).await;

    service.add_keyboard(2, false);
    assert_eq!(
        next_change(&mut receiver).await,
        BacklightChange::new(KeyboardId(2), BacklightProperty::Devices)
    );
    service.set_brightness(KeyboardId(2), 0.5).await.unwrap();
    assert_eq!(
        next_change(&mut receiver).await,
        BacklightChange::new(KeyboardId(2), BacklightProperty::Brightness)
    );
    service.set_brightness(KeyboardId(1), 0.5).await.unwrap();
    assert_eq!(
        next_change(&mut receiver).await,
        BacklightChange::new(KeyboardId(1), BacklightProperty::Brightness)
    );

    service.remove_keyboard(2);
    assert_eq!(
        next_change(&mut receiver).await,
        BacklightChange::new(KeyboardId(2), BacklightProperty::Devices)
    );

    handle.await_shutdown().await;
    let after_shutdown = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("Forwarding didn't end");
    assert!(after_shutdown.is_none());
}

#[tokio::test]
async fn test_forwarding_present_keyboards() {
    let service = MockBacklightService::new()
        .with_keyboard(1, true)
        .with_keyboard(2, false);
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handle = forward_keyboard_changes(Arc::new(service.clone()), sender).await;

    // Keyboards present from the start aren't announced as new
    service.set_idle_dim_timeout(KeyboardId(2), 10.0).await.unwrap();
    assert_eq!(
        next_change(&mut receiver).await,
        BacklightChange::new(KeyboardId(2), BacklightProperty::IdleDimTimeout)
    );
    handle.await_shutdown().await;
}
