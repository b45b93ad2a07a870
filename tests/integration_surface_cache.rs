//! Surface cache integration tests
//!
//! Checkout surfaces that own a session, built and destroyed through the
//! cache on a real UI thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use surface_bridge::cache::{LoadMode, ManualClock, RetainDirective, Surface, SurfaceCache, SurfaceFactory};
use surface_bridge::channel::{ReceiveHandler, TransportChannel, TransportError};
use surface_bridge::config::PreloadingConfig;
use surface_bridge::error::Result;
use surface_bridge::events::{CheckoutMessage, checkout_registry};
use surface_bridge::session::Session;
use surface_bridge::ui::{InlineExecutor, UiExecutor, UiThread, run_blocking};

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<String>>,
    handler: Mutex<Option<ReceiveHandler>>,
}

impl RecordingChannel {
    fn deliver(&self, raw: &str) {
        let handler = self.handler.lock().unwrap().clone().unwrap();
        handler(raw.to_string());
    }
}

impl TransportChannel for RecordingChannel {
    fn send(&self, text: &str) -> std::result::Result<(), TransportError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn register_receive_handler(&self, handler: ReceiveHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

/// A checkout surface: one transport and the session speaking over it.
struct CheckoutSurface {
    key: String,
    session: Session<CheckoutMessage>,
    transport: Arc<RecordingChannel>,
    _channel: Arc<dyn TransportChannel>,
    built_on: ThreadId,
    inbox: Arc<Mutex<Vec<CheckoutMessage>>>,
}

impl Surface for CheckoutSurface {
    fn release(&self) {
        self.session.teardown();
    }
}

#[derive(Default)]
struct CheckoutFactory {
    created: AtomicUsize,
    destroyed_on: Mutex<Vec<ThreadId>>,
}

impl SurfaceFactory for CheckoutFactory {
    type Surface = CheckoutSurface;

    fn create(&self, key: &str, _mode: LoadMode) -> Result<CheckoutSurface> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        let session = Session::new(
            Arc::new(checkout_registry()),
            Arc::new(move |message: CheckoutMessage| sink.lock().unwrap().push(message)),
        );
        let transport = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn TransportChannel> = transport.clone();
        session.attach(&channel);
        Ok(CheckoutSurface {
            key: key.to_string(),
            session,
            transport,
            _channel: channel,
            built_on: thread::current().id(),
            inbox,
        })
    }

    fn destroy(&self, _surface: &CheckoutSurface) {
        self.destroyed_on.lock().unwrap().push(thread::current().id());
    }
}

const TTL: Duration = Duration::from_secs(300);
const SUBMIT: &str = r#"{"version":"2.0","id":"s1","method":"checkout.submitStart","params":{"cart":{},"checkout":{}}}"#;

fn flush(ui: &dyn UiExecutor) {
    run_blocking(ui, || ()).unwrap();
}

#[test]
fn test_surfaces_are_built_and_destroyed_on_ui_thread() {
    let ui = Arc::new(UiThread::spawn("cache-ui").unwrap());
    let ui_thread = run_blocking(ui.as_ref(), || thread::current().id()).unwrap();
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory.clone(), ui.clone());

    let first = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    assert_eq!(first.built_on, ui_thread);
    assert_ne!(thread::current().id(), ui_thread);

    cache.fetch_or_create("https://shop/checkouts/2", TTL).unwrap();
    flush(ui.as_ref());

    assert!(first.is_destroyed());
    assert_eq!(*factory.destroyed_on.lock().unwrap(), vec![ui_thread]);
}

#[test]
fn test_eviction_cancels_pending_requests_on_the_old_surface() {
    let ui = Arc::new(UiThread::spawn("cache-ui").unwrap());
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory.clone(), ui.clone());

    let old = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    old.transport.deliver(SUBMIT);
    assert_eq!(old.session.pending_count(), 1);

    cache.fetch_or_create("https://shop/checkouts/2", TTL).unwrap();
    flush(ui.as_ref());

    let sent = old.transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let envelope: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(envelope["id"], "s1");
    assert_eq!(envelope["error"], "cancelled");
    assert!(!old.session.is_attached());

    // Answering after eviction is a no-op.
    let messages = std::mem::take(&mut *old.inbox.lock().unwrap());
    if let Some(CheckoutMessage::SubmitStart(request)) = messages.into_iter().next() {
        request.respond_with(Default::default());
    }
    assert_eq!(old.transport.sent.lock().unwrap().len(), 1);
}

#[test]
fn test_ttl_expiry_with_injected_clock() {
    let factory = Arc::new(CheckoutFactory::default());
    let clock = Arc::new(ManualClock::new());
    let cache = SurfaceCache::new(factory.clone(), Arc::new(InlineExecutor)).with_clock(clock.clone());

    let a = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    clock.advance(TTL - Duration::from_millis(1));
    let b = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    assert_eq!(a, b);

    clock.advance(Duration::from_millis(1));
    let c = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    assert_ne!(a, c);
    assert!(a.is_destroyed());
    assert_eq!(factory.created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_zero_ttl_never_reuses() {
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory, Arc::new(InlineExecutor));

    let mut previous = cache.fetch_or_create("https://shop/checkouts/1", Duration::ZERO).unwrap();
    for _ in 0..3 {
        let next = cache.fetch_or_create("https://shop/checkouts/1", Duration::ZERO).unwrap();
        assert_ne!(previous, next);
        assert!(previous.is_destroyed());
        previous = next;
    }
}

#[test]
fn test_retain_if_fresh_directive_resets_after_each_detach() {
    let factory = Arc::new(CheckoutFactory::default());
    let clock = Arc::new(ManualClock::new());
    let cache = SurfaceCache::new(factory, Arc::new(InlineExecutor)).with_clock(clock.clone());

    let fresh = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    cache.retain_next_detach(RetainDirective::RetainIfFresh);
    cache.on_attach();
    assert!(cache.on_detach(RetainDirective::NoRetainDefault));
    assert!(!fresh.is_destroyed());

    // Directive was consumed; default applies now.
    cache.on_attach();
    assert!(!cache.on_detach(RetainDirective::NoRetainDefault));
    assert!(fresh.is_destroyed());

    let stale = cache.fetch_or_create("https://shop/checkouts/1", TTL).unwrap();
    clock.advance(TTL);
    cache.retain_next_detach(RetainDirective::RetainIfFresh);
    assert!(!cache.on_detach(RetainDirective::NoRetainDefault));
    assert!(stale.is_destroyed());
}

#[test]
fn test_complete_invalidates_and_error_clears() {
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory, Arc::new(InlineExecutor));

    let surface = cache.present("https://shop/checkouts/1").unwrap();
    surface.transport.deliver(r#"{"method":"checkout.complete","params":{}}"#);
    let complete = surface.inbox.lock().unwrap().pop().unwrap();
    complete.apply_to_cache(&cache);
    assert!(cache.current().unwrap().is_invalidated());
    assert!(!surface.is_destroyed());

    surface.transport.deliver(r#"{"method":"checkout.error","params":{"code":"CART_COMPLETED"}}"#);
    let error = surface.inbox.lock().unwrap().pop().unwrap();
    error.apply_to_cache(&cache);
    assert!(cache.current().is_none());
    assert!(surface.is_destroyed());
}

#[test]
fn test_bare_error_notification_clears_cache() {
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory, Arc::new(InlineExecutor));

    let surface = cache.present("https://shop/checkouts/1").unwrap();
    surface.transport.deliver(r#"{"version":"2.0","method":"checkout.error"}"#);
    let error = surface.inbox.lock().unwrap().pop().unwrap();
    error.apply_to_cache(&cache);

    assert!(cache.current().is_none());
    assert!(surface.is_destroyed());
}

#[test]
fn test_preload_while_attached_reuses_surface() {
    let factory = Arc::new(CheckoutFactory::default());
    let cache = SurfaceCache::new(factory.clone(), Arc::new(InlineExecutor)).with_preloading(PreloadingConfig::default());

    let shown = cache.present("https://shop/checkouts/1").unwrap();
    cache.on_attach();
    let preloaded = cache.preload("https://shop/checkouts/2").unwrap().unwrap();

    assert_eq!(shown, preloaded);
    assert_eq!(shown.key, "https://shop/checkouts/1");
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);

    // The reloaded surface now shows a different checkout, so it must not be
    // handed out again for the old key.
    cache.on_detach(RetainDirective::AlwaysRetain);
    let next = cache.present("https://shop/checkouts/1").unwrap();
    assert_ne!(next, shown);
}
