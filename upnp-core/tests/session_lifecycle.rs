//! End-to-end session tests against an in-memory protocol layer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use url::Url;
use xmltree::Element;

use upnp_core::prelude::*;
use upnp_core::protocol::{Advertisement, ProtocolRequest};
use upnp_core::{EventPayload, PoolConfig};

const DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room</friendlyName>
    <UDN>uuid:5c29e1b3-9c0f-4f0e-b012-1d37e4c7a981</UDN>
    <serviceList>
      <service>
        <serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
        <serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
        <eventSubURL>/av/event</eventSubURL>
      </service>
    </serviceList>
  </device>
</root>"#;

/// In-memory protocol layer. `hold` parks `perform` calls so tests can
/// control when a dispatched job's blocking phase completes.
struct FakeProtocol {
    performed: Mutex<Vec<OpKind>>,
    advertised: AtomicUsize,
    hold: (Mutex<bool>, Condvar),
}

impl FakeProtocol {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            performed: Mutex::new(Vec::new()),
            advertised: AtomicUsize::new(0),
            hold: (Mutex::new(false), Condvar::new()),
        })
    }

    fn set_hold(&self, held: bool) {
        *self.hold.0.lock().unwrap() = held;
        self.hold.1.notify_all();
    }

    fn advertise_count(&self) -> usize {
        self.advertised.load(Ordering::SeqCst)
    }
}

impl ProtocolClient for FakeProtocol {
    fn perform(&self, request: &ProtocolRequest) -> upnp_core::Result<EventPayload> {
        let mut held = self.hold.0.lock().unwrap();
        while *held {
            held = self.hold.1.wait(held).unwrap();
        }
        drop(held);

        self.performed.lock().unwrap().push(request.op);
        Ok(match request.op {
            OpKind::Subscribe => EventPayload::Subscribed {
                sid: SubscriptionId::generate(),
                timeout: request.timeout,
            },
            OpKind::Notify => EventPayload::Notified,
            _ => EventPayload::MiniServer,
        })
    }

    fn advertise(&self, _ad: &Advertisement) -> upnp_core::Result<()> {
        self.advertised.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_ifinfo() -> IfInfo {
    IfInfo {
        name: "lo0".to_string(),
        ipv4: Some(std::net::Ipv4Addr::LOCALHOST),
        ipv6: None,
        index: 1,
    }
}

fn start_sdk(config: SdkConfig) -> (UpnpSdk, Arc<FakeProtocol>) {
    let protocol = FakeProtocol::new();
    let sdk = UpnpSdk::init_with_interface(
        config,
        protocol.clone() as Arc<dyn ProtocolClient>,
        test_ifinfo(),
    )
    .unwrap();
    (sdk, protocol)
}

fn registration(callback: Callback, max_age: Option<Duration>) -> DeviceRegistration {
    DeviceRegistration {
        desc_url: Url::parse("http://192.168.1.10:49152/desc.xml").unwrap(),
        description: Element::parse(DESCRIPTION_XML.as_bytes()).unwrap(),
        callback,
        cookie: Cookie::none(),
        max_age,
        address_family: AddressFamily::Ipv4,
    }
}

fn noop() -> Callback {
    Arc::new(|_event| {})
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_dispatch_delivers_subscription_event_with_cookie() {
    let (sdk, _protocol) = start_sdk(SdkConfig::resource_efficient());
    let client = sdk.register_client(noop(), Cookie::none()).unwrap();

    let (tx, rx) = mpsc::channel();
    let callback: Callback = Arc::new(move |event: &SdkEvent| {
        let sid = match &event.result {
            Ok(EventPayload::Subscribed { sid, .. }) => Some(*sid),
            _ => None,
        };
        let label = event.cookie.downcast_ref::<&str>().copied();
        tx.send((event.op, sid, label)).unwrap();
    });

    let param = NonblockParam::builder(client, OpKind::Subscribe)
        .url("http://192.168.1.10:1400/av/event")
        .callback(callback)
        .cookie(Cookie::new("av-sub"))
        .build()
        .unwrap();
    sdk.dispatch(param).unwrap();

    let (op, sid, label) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(op, OpKind::Subscribe);
    assert!(sid.is_some());
    assert_eq!(label, Some("av-sub"));
    sdk.shutdown();
}

#[test]
fn test_handle_capacity_is_enforced() {
    let config = SdkConfig::resource_efficient().with_max_handles(2);
    let (sdk, _protocol) = start_sdk(config);

    let first = sdk.register_device(registration(noop(), None)).unwrap();
    let _second = sdk.register_client(noop(), Cookie::none()).unwrap();
    assert!(matches!(
        sdk.register_client(noop(), Cookie::none()),
        Err(UpnpError::OutOfHandles { capacity: 2 })
    ));

    // Freeing reopens the lowest slot.
    sdk.unregister(first).unwrap();
    let reused = sdk.register_client(noop(), Cookie::none()).unwrap();
    assert_eq!(reused, first);
    sdk.shutdown();
}

#[test]
fn test_periodic_advertisements_keep_coming_until_unregister() {
    let (sdk, protocol) = start_sdk(SdkConfig::resource_efficient());
    // max-age of two seconds floors the re-announce interval at one second.
    let device = sdk
        .register_device(registration(noop(), Some(Duration::from_secs(2))))
        .unwrap();

    // Initial announcement plus at least one periodic re-announcement.
    assert!(wait_until(Duration::from_millis(2500), || {
        protocol.advertise_count() >= 2
    }));

    sdk.unregister(device).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let settled = protocol.advertise_count();
    std::thread::sleep(Duration::from_millis(1200));
    assert_eq!(protocol.advertise_count(), settled);
    sdk.shutdown();
}

#[test]
fn test_handle_freed_mid_dispatch_reports_invalid_handle_once() {
    let mut config = SdkConfig::resource_efficient();
    config.send_pool = PoolConfig {
        workers: 1,
        queue_capacity: 16,
    };
    let (sdk, protocol) = start_sdk(config);

    let victim = sdk.register_client(noop(), Cookie::none()).unwrap();
    let other = sdk.register_client(noop(), Cookie::none()).unwrap();

    // Park the single send worker inside a blocking protocol call on the
    // other handle, so the victim's job stays queued.
    protocol.set_hold(true);
    let (blocker_tx, blocker_rx) = mpsc::channel();
    let blocker: Callback = Arc::new(move |_event: &SdkEvent| {
        blocker_tx.send(()).unwrap();
    });
    sdk.dispatch(
        NonblockParam::builder(other, OpKind::Subscribe)
            .url("http://192.168.1.10:1400/av/event")
            .callback(blocker)
            .build()
            .unwrap(),
    )
    .unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let counter = Arc::clone(&invocations);
    let callback: Callback = Arc::new(move |event: &SdkEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        tx.send(matches!(event.result, Err(UpnpError::InvalidHandle(_))))
            .unwrap();
    });
    sdk.dispatch(
        NonblockParam::builder(victim, OpKind::Subscribe)
            .url("http://192.168.1.10:1400/av/event")
            .callback(callback)
            .build()
            .unwrap(),
    )
    .unwrap();

    sdk.unregister(victim).unwrap();
    protocol.set_hold(false);

    blocker_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    sdk.shutdown();
}

#[test]
fn test_concurrent_register_and_unregister_keep_live_handles_unique() {
    // A small table forces constant slot reuse across threads, so a racy
    // allocate/free path would hand the same handle to two live owners.
    let config = SdkConfig::default().with_max_handles(16);
    let (sdk, _protocol) = start_sdk(config);
    let sdk = Arc::new(sdk);
    let live = Arc::new(Mutex::new(HashSet::new()));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let sdk = Arc::clone(&sdk);
            let live = Arc::clone(&live);
            std::thread::spawn(move || {
                let mut held: Vec<Handle> = Vec::new();
                for n in 0..50 {
                    match sdk.register_client(noop(), Cookie::none()) {
                        Ok(handle) => {
                            let fresh = live.lock().unwrap().insert(handle.as_i32());
                            assert!(fresh, "two live registrations share {handle}");
                            held.push(handle);
                        }
                        Err(UpnpError::OutOfHandles { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                    // Free one of our own on odd rounds so other threads
                    // race to reuse the slot.
                    if n % 2 == 1 {
                        if let Some(handle) = held.pop() {
                            live.lock().unwrap().remove(&handle.as_i32());
                            sdk.unregister(handle).unwrap();
                        }
                    }
                }
                for handle in held {
                    live.lock().unwrap().remove(&handle.as_i32());
                    sdk.unregister(handle).unwrap();
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(sdk.handle_count(), 0);
    assert!(live.lock().unwrap().is_empty());
    sdk.shutdown();
}

#[test]
fn test_writer_makes_progress_under_sustained_readers() {
    let (sdk, _protocol) = start_sdk(SdkConfig::resource_efficient());
    let sdk = Arc::new(sdk);
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let sdk = Arc::clone(&sdk);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut observed = 0usize;
                while !stop.load(Ordering::SeqCst) {
                    observed = observed.max(sdk.handle_count());
                }
                observed
            })
        })
        .collect();

    // Let the read side saturate the lock before the writer arrives.
    std::thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    let handle = sdk.register_client(noop(), Cookie::none()).unwrap();
    let waited = start.elapsed();
    assert!(waited < Duration::from_secs(2), "writer starved for {waited:?}");

    stop.store(true, Ordering::SeqCst);
    let observed_max = readers
        .into_iter()
        .map(|r| r.join().unwrap())
        .max()
        .unwrap_or(0);
    assert!(observed_max <= 1);

    sdk.unregister(handle).unwrap();
    sdk.shutdown();
}

#[test]
fn test_shutdown_rejects_new_work() {
    let (sdk, _protocol) = start_sdk(SdkConfig::resource_efficient());
    let client = sdk.register_client(noop(), Cookie::none()).unwrap();
    sdk.shutdown();

    let result = sdk.dispatch(
        NonblockParam::builder(client, OpKind::Subscribe)
            .url("http://192.168.1.10:1400/av/event")
            .callback(noop())
            .build()
            .unwrap(),
    );
    assert!(matches!(result, Err(UpnpError::ShuttingDown { .. })));
}
