//! Browser bindings of a curation session.
//!
//! The host constructs a [`Curator`] for a canvas, obtains an [`EventQueue`]
//! and enters the event loop. All further interaction goes through the queue;
//! changes of the partition are reported to the callback passed to the
//! constructor as JSON strings.
use std::io;

use async_channel::{Receiver, Sender};
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::{
    action::{InteractMode, Key, KeyEvent, Modifiers, PointerButton, PointerEvent, WheelEvent},
    cluster::{ClusterId, CurationRecord, LabelField, SpikeId},
    history::{ChangeCause, ClusterChange},
    webgpu::WebGpuDevice,
    Error, Session, SessionConfig, SpikeData,
};

/// Buffers one formatted log line and prints it to the console when dropped.
struct ConsoleWriter(Vec<u8>);

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.0);
        let line = line.trim_end();
        if !line.is_empty() {
            web_sys::console::log_1(&line.into());
        }
    }
}

fn install_logging() {
    // A second curator keeps the subscriber of the first one.
    let _ = tracing_subscriber::fmt()
        .with_writer(|| ConsoleWriter(Vec::new()))
        .without_time()
        .with_ansi(false)
        .try_init();
}

fn to_js_error(err: Error) -> JsValue {
    JsError::new(&err.to_string()).into()
}

fn cluster_ids(ids: &[u32]) -> Vec<ClusterId> {
    ids.iter().copied().map(ClusterId).collect()
}

fn modifiers(shift: bool, ctrl: bool, alt: bool, meta: bool) -> Modifiers {
    let mut modifiers = Modifiers::NONE;
    for (held, modifier) in [
        (shift, Modifiers::SHIFT),
        (ctrl, Modifiers::CTRL),
        (alt, Modifiers::ALT),
        (meta, Modifiers::META),
    ] {
        if held {
            modifiers |= modifier;
        }
    }
    modifiers
}

/// Change notification as seen by the host.
#[derive(Debug, Serialize)]
struct ChangeMessage<'a> {
    cause: &'a str,
    command: Option<&'a str>,
    added: &'a [ClusterId],
    removed: &'a [ClusterId],
    metadata_changed: &'a [ClusterId],
}

impl<'a> From<&'a ClusterChange> for ChangeMessage<'a> {
    fn from(change: &'a ClusterChange) -> Self {
        let (cause, command) = match change.cause {
            ChangeCause::Execute(kind) => ("execute", Some(kind.name())),
            ChangeCause::Undo(kind) => ("undo", Some(kind.name())),
            ChangeCause::Redo(kind) => ("redo", Some(kind.name())),
            ChangeCause::Load => ("load", None),
        };
        Self {
            cause,
            command,
            added: &change.added,
            removed: &change.removed,
            metadata_changed: &change.metadata_changed,
        }
    }
}

pub enum Event {
    Exit,
    Resize {
        width: u32,
        height: u32,
        device_pixel_ratio: f32,
    },
    Draw {
        completion: Sender<()>,
    },
    PointerDown {
        event: web_sys::PointerEvent,
    },
    PointerUp {
        event: web_sys::PointerEvent,
    },
    PointerMove {
        event: web_sys::PointerEvent,
    },
    Wheel {
        event: web_sys::WheelEvent,
    },
    Key {
        event: web_sys::KeyboardEvent,
    },
    SetMode {
        mode: InteractMode,
    },
    Select {
        clusters: Vec<ClusterId>,
    },
    Merge {
        clusters: Vec<ClusterId>,
    },
    Split {
        cluster: ClusterId,
        spikes: Vec<SpikeId>,
    },
    SplitLasso,
    Move {
        clusters: Vec<ClusterId>,
        group: Option<String>,
    },
    Label {
        clusters: Vec<ClusterId>,
        field: LabelField,
        value: Option<String>,
    },
    Undo,
    Redo,
    Save {
        completion: Sender<String>,
    },
    Load {
        record: CurationRecord,
    },
}

/// A curation session drawing into a canvas.
#[wasm_bindgen]
pub struct Curator {
    callback: js_sys::Function,
    session: Session<WebGpuDevice>,
    changes: Receiver<ClusterChange>,
    event_queue: Option<Receiver<Event>>,
    pixel_ratio: f64,
}

#[wasm_bindgen]
impl Curator {
    /// Constructs a new curator.
    ///
    /// `features` holds `n_features` values per spike and `waveforms`
    /// `n_samples * n_channels` values per spike, channels varying fastest;
    /// both may be empty. `config` is a JSON encoded session configuration.
    #[wasm_bindgen(constructor)]
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        callback: js_sys::Function,
        canvas: web_sys::HtmlCanvasElement,
        assignments: Vec<u32>,
        times: Vec<f64>,
        amplitudes: Vec<f32>,
        features: Vec<f32>,
        n_features: usize,
        waveforms: Vec<f32>,
        n_samples: usize,
        n_channels: usize,
        config: Option<String>,
    ) -> Result<Curator, JsValue> {
        console_error_panic_hook::set_once();
        install_logging();

        let config = match config {
            Some(json) => SessionConfig::from_json(&json).map_err(to_js_error)?,
            None => SessionConfig::default(),
        };

        let mut spikes = SpikeData::new(times, amplitudes).map_err(|e| to_js_error(e.into()))?;
        if n_features != 0 {
            spikes = spikes
                .with_features(features, n_features)
                .map_err(|e| to_js_error(e.into()))?;
        }
        if !waveforms.is_empty() {
            spikes = spikes
                .with_waveforms(waveforms, n_samples, n_channels)
                .map_err(|e| to_js_error(e.into()))?;
        }

        let (width, height) = (canvas.width(), canvas.height());
        let device = WebGpuDevice::request(canvas).await?;
        let mut session = Session::new(device, width, height, &assignments, spikes, config)
            .map_err(to_js_error)?;
        let changes = session.subscribe();

        Ok(Self {
            callback,
            session,
            changes,
            event_queue: None,
            pixel_ratio: 1.0,
        })
    }

    /// Constructs a new event queue for this curator.
    ///
    /// # Panics
    ///
    /// Panics if called multiple times.
    #[wasm_bindgen(js_name = constructEventQueue)]
    pub fn construct_event_queue(&mut self) -> EventQueue {
        if self.event_queue.is_some() {
            panic!("EventQueue was already constructed.");
        }

        let (sx, rx) = async_channel::unbounded();
        self.event_queue = Some(rx);
        EventQueue { sender: sx }
    }

    /// Starts the event loop of the curator.
    ///
    /// # Panics
    ///
    /// Panics if no [`EventQueue`] is associated with the curator.
    #[wasm_bindgen(js_name = enterEventLoop)]
    pub async fn enter_event_loop(&mut self) {
        let Some(events) = self.event_queue.take() else {
            panic!("EventQueue was not initialized.");
        };

        loop {
            match events.recv().await.expect("the channel should be open") {
                Event::Exit => break,
                Event::Draw { completion } => {
                    let outcome = self.session.frame();
                    tracing::trace!("frame: {outcome:?}");
                    completion
                        .send(())
                        .await
                        .expect("the channel should be open");
                }
                Event::Save { completion } => {
                    let json = self.session.save().to_json().unwrap_or_else(|err| {
                        tracing::warn!("could not encode the curation record: {err}");
                        String::new()
                    });
                    completion
                        .send(json)
                        .await
                        .expect("the channel should be open");
                }
                event => {
                    if let Err(err) = self.handle_event(event) {
                        tracing::warn!("{err}");
                    }
                }
            }
            self.report_changes();
        }

        self.event_queue = Some(events);
    }
}

impl Curator {
    fn pointer_event(&self, event: &web_sys::PointerEvent) -> PointerEvent {
        PointerEvent::new(
            event.offset_x() as f64 * self.pixel_ratio,
            event.offset_y() as f64 * self.pixel_ratio,
        )
        .with_button(PointerButton::from_dom(event.button()))
        .with_modifiers(modifiers(
            event.shift_key(),
            event.ctrl_key(),
            event.alt_key(),
            event.meta_key(),
        ))
    }

    fn handle_event(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::Resize {
                width,
                height,
                device_pixel_ratio,
            } => {
                self.pixel_ratio = device_pixel_ratio as f64;
                self.session.resize(width, height);
            }
            Event::PointerDown { event } => {
                let event = self.pointer_event(&event);
                self.session.pointer_down(&event);
            }
            Event::PointerUp { event } => {
                let event = self.pointer_event(&event);
                self.session.pointer_up(&event);
            }
            Event::PointerMove { event } => {
                let event = self.pointer_event(&event);
                self.session.pointer_move(&event);
            }
            Event::Wheel { event } => {
                let mut wheel = WheelEvent::new(
                    event.offset_x() as f64 * self.pixel_ratio,
                    event.offset_y() as f64 * self.pixel_ratio,
                    -event.delta_y(),
                );
                wheel.modifiers = modifiers(
                    event.shift_key(),
                    event.ctrl_key(),
                    event.alt_key(),
                    event.meta_key(),
                );
                self.session.wheel(&wheel);
            }
            Event::Key { event } => {
                let mut key = KeyEvent::new(Key::from_dom(&event.key()));
                key.modifiers = modifiers(
                    event.shift_key(),
                    event.ctrl_key(),
                    event.alt_key(),
                    event.meta_key(),
                );
                self.session.key(&key);
            }
            Event::SetMode { mode } => {
                self.session.set_mode(mode);
            }
            Event::Select { clusters } => {
                self.session.select(clusters);
            }
            Event::Merge { clusters } => {
                self.session.merge(&clusters)?;
            }
            Event::Split { cluster, spikes } => {
                self.session.split(cluster, &spikes)?;
            }
            Event::SplitLasso => {
                self.session.split_lasso()?;
            }
            Event::Move { clusters, group } => {
                self.session.move_to(&clusters, group.as_deref())?;
            }
            Event::Label {
                clusters,
                field,
                value,
            } => {
                self.session.label(&clusters, field, value.as_deref())?;
            }
            Event::Undo => {
                self.session.undo();
            }
            Event::Redo => {
                self.session.redo();
            }
            Event::Load { record } => self.session.load(&record)?,
            Event::Exit | Event::Draw { .. } | Event::Save { .. } => {
                unreachable!("handled by the event loop")
            }
        }
        Ok(())
    }

    fn report_changes(&self) {
        while let Ok(change) = self.changes.try_recv() {
            let message = match serde_json::to_string(&ChangeMessage::from(&change)) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!("could not encode a cluster change: {err}");
                    continue;
                }
            };
            if let Err(err) = self.callback.call1(&JsValue::NULL, &message.into()) {
                tracing::warn!("the change callback failed: {err:?}");
            }
        }
    }
}

/// An event queue to interact with the curator.
#[wasm_bindgen]
pub struct EventQueue {
    sender: Sender<Event>,
}

impl EventQueue {
    fn send(&self, event: Event) {
        self.sender
            .send_blocking(event)
            .expect("the channel should be open");
    }
}

#[wasm_bindgen]
impl EventQueue {
    /// Spawns an event to shut down the curator.
    pub fn exit(&self) {
        self.send(Event::Exit);
    }

    /// Spawns a `resize` event.
    pub fn resize(&self, width: u32, height: u32, device_pixel_ratio: f32) {
        self.send(Event::Resize {
            width,
            height,
            device_pixel_ratio,
        });
    }

    /// Spawns a `pointer_down` event.
    #[wasm_bindgen(js_name = pointerDown)]
    pub fn pointer_down(&self, event: web_sys::PointerEvent) {
        self.send(Event::PointerDown { event });
    }

    /// Spawns a `pointer_up` event.
    #[wasm_bindgen(js_name = pointerUp)]
    pub fn pointer_up(&self, event: web_sys::PointerEvent) {
        self.send(Event::PointerUp { event });
    }

    /// Spawns a `pointer_move` event.
    #[wasm_bindgen(js_name = pointerMove)]
    pub fn pointer_move(&self, event: web_sys::PointerEvent) {
        self.send(Event::PointerMove { event });
    }

    pub fn wheel(&self, event: web_sys::WheelEvent) {
        self.send(Event::Wheel { event });
    }

    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&self, event: web_sys::KeyboardEvent) {
        self.send(Event::Key { event });
    }

    /// Switches between `pan`, `zoom` and `lasso`.
    #[wasm_bindgen(js_name = setMode)]
    pub fn set_mode(&self, mode: &str) -> Result<(), JsError> {
        let mode = InteractMode::from_name(mode)
            .ok_or_else(|| JsError::new(&format!("unknown interaction mode {mode:?}")))?;
        self.send(Event::SetMode { mode });
        Ok(())
    }

    pub fn select(&self, clusters: &[u32]) {
        self.send(Event::Select {
            clusters: cluster_ids(clusters),
        });
    }

    pub fn merge(&self, clusters: &[u32]) {
        self.send(Event::Merge {
            clusters: cluster_ids(clusters),
        });
    }

    pub fn split(&self, cluster: u32, spikes: &[u32]) {
        self.send(Event::Split {
            cluster: ClusterId(cluster),
            spikes: spikes.iter().copied().map(SpikeId).collect(),
        });
    }

    /// Splits the spikes inside the current lasso.
    #[wasm_bindgen(js_name = splitLasso)]
    pub fn split_lasso(&self) {
        self.send(Event::SplitLasso);
    }

    /// Assigns the clusters to a group, e.g. `good`, `mua` or `noise`.
    #[wasm_bindgen(js_name = moveTo)]
    pub fn move_to(&self, clusters: &[u32], group: Option<String>) {
        self.send(Event::Move {
            clusters: cluster_ids(clusters),
            group,
        });
    }

    pub fn label(&self, clusters: &[u32], field: &str, value: Option<String>) {
        self.send(Event::Label {
            clusters: cluster_ids(clusters),
            field: LabelField::from_name(field),
            value,
        });
    }

    pub fn undo(&self) {
        self.send(Event::Undo);
    }

    pub fn redo(&self) {
        self.send(Event::Redo);
    }

    /// Loads a curation record saved by [`EventQueue::save`].
    pub fn load(&self, json: &str) -> Result<(), JsError> {
        let record = CurationRecord::from_json(json).map_err(|err| JsError::new(&err.to_string()))?;
        self.send(Event::Load { record });
        Ok(())
    }

    /// The curation record of the current partition, as JSON.
    pub async fn save(&self) -> String {
        let (sx, rx) = async_channel::bounded(1);
        self.sender
            .send(Event::Save { completion: sx })
            .await
            .expect("the channel should be open when trying to send a message");
        rx.recv().await.expect("the channel should be open")
    }

    /// Spawns a `draw` event.
    pub async fn draw(&self) {
        let (sx, rx) = async_channel::bounded(1);

        // Spawn the event.
        self.sender
            .send(Event::Draw { completion: sx })
            .await
            .expect("the channel should be open when trying to send a message");

        // Wait for the event to complete.
        rx.recv().await.expect("the channel should be open");
    }
}
