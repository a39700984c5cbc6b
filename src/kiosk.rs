//! The kiosk sync module.
//!
//! [`Kiosk`] owns every piece of protocol state (binding, homework snapshot,
//! roster, debouncers, timers) and is driven entirely through
//! [`MqttModule`]: link events and UI intents go in, publishes come out
//! through the outbox and state changes go to the [`RenderSink`]. It never
//! touches the network itself, so the whole protocol can be exercised with
//! explicit instants and a recording outbox.

use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::Instant;
use rand_core::RngCore;

use crate::binding::{Binding, BindingManager, Storage, UiMode};
use crate::clock::{WallClock, iso_timestamp, until_rollover};
use crate::command::{CommandBuilder, DeviceCommand, HomeworkAction};
use crate::config::KioskConfig;
use crate::connection::LinkEvent;
use crate::debounce::{Debounce, Gate, RefreshGate};
use crate::error::CommandError;
use crate::homework::{HomeworkStateMachine, Signal};
use crate::packet::QoS;
use crate::presence::{LastWill, PRESENCE_QOS, PresenceBeacon};
use crate::runtime::{MqttModule, PublishOutbox, TopicCollector};
use crate::schema::{HomeworkItem, Phase, RosterEntry, StudentInfo};
use crate::sink::RenderSink;
use crate::timer::{Scheduler, TimerId};
use crate::topics::{ALL_ITEMS, Inbound, TopicRouter, Topics};

/// Commands are delivered at least once; the backend deduplicates.
const COMMAND_QOS: QoS = QoS::AtLeastOnce;

/// What a scheduled timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tick {
    Presence,
    Elapsed,
    Attention,
    RosterRefresh,
    HomeworkRefresh,
    Restart,
    Midnight,
}

/// A user action queued by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiIntent {
    /// A roster card was tapped.
    SelectStudent(String),
    /// A homework card was tapped; the action follows from the item's phase.
    TapHomework(String),
    /// An explicit request for one item, checked against its phase.
    Request {
        item_id: String,
        action: HomeworkAction,
    },
    PauseAll,
    Logout,
    CheckUpdate,
    RefreshRoster,
}

pub struct Kiosk<S, R, G, W> {
    config: KioskConfig,
    router: TopicRouter,
    commands: CommandBuilder<G>,
    presence: PresenceBeacon,
    binding: BindingManager<S>,
    homework: HomeworkStateMachine,
    taps: Debounce,
    roster_gate: RefreshGate<Vec<RosterEntry>>,
    homework_gate: RefreshGate<Vec<HomeworkItem>>,
    timers: Scheduler<Tick>,
    roster: Vec<RosterEntry>,
    student_info: Option<StudentInfo>,
    online: bool,
    restart_pending: bool,
    presence_timer: Option<TimerId>,
    midnight_timer: Option<TimerId>,
    sink: R,
    clock: W,
}

impl<S, R, G, W> Kiosk<S, R, G, W>
where
    S: Storage,
    R: RenderSink,
    G: RngCore,
    W: WallClock,
{
    /// Restores the persisted binding and tells the sink which mode to show.
    pub fn new(config: KioskConfig, storage: S, sink: R, rng: G, clock: W) -> Self {
        let topics = Topics::new(&config.identity);
        let commands = CommandBuilder::new(
            rng,
            config.identity.academy_id(),
            config.updated_by.as_deref(),
        );
        let presence = PresenceBeacon::new(&topics, config.presence_interval);
        let mut kiosk = Self {
            router: TopicRouter::new(topics, config.max_message_len),
            commands,
            presence,
            binding: BindingManager::restore(storage),
            homework: HomeworkStateMachine::new(config.elapsed_tick, config.attention_period),
            taps: Debounce::new(config.card_debounce),
            roster_gate: RefreshGate::new(config.refresh_debounce),
            homework_gate: RefreshGate::new(config.refresh_debounce),
            timers: Scheduler::new(),
            roster: Vec::new(),
            student_info: None,
            online: false,
            restart_pending: false,
            presence_timer: None,
            midnight_timer: None,
            sink,
            clock,
            config,
        };
        let mode = kiosk.binding.mode();
        info!("kiosk: booting in {:?} mode", mode);
        kiosk.sink.mode_changed(mode);
        kiosk
    }

    pub fn topics(&self) -> &Topics {
        self.router.topics()
    }

    pub fn binding(&self) -> &Binding {
        self.binding.binding()
    }

    pub fn student_id(&self) -> Option<&str> {
        self.binding.student_id()
    }

    pub fn mode(&self) -> UiMode {
        self.binding.mode()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn homework(&self) -> &HomeworkStateMachine {
        &self.homework
    }

    pub fn student_info(&self) -> Option<&StudentInfo> {
        self.student_info.as_ref()
    }

    pub fn storage(&self) -> &S {
        self.binding.storage()
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut R {
        &mut self.sink
    }

    pub fn handle_event(&mut self, event: LinkEvent<'_>, now: Instant, outbox: &mut dyn PublishOutbox) {
        match event {
            LinkEvent::Connected => self.on_connected(now, outbox),
            LinkEvent::Disconnected(reason) => {
                info!("kiosk: offline ({:?})", reason);
                if self.online {
                    self.online = false;
                    self.sink.connection_changed(false);
                }
                if let Some(id) = self.presence_timer.take() {
                    self.timers.cancel(id);
                }
                self.router.reset();
            }
            LinkEvent::Message { topic, fragment } => {
                if let Some(inbound) = self.router.route(topic, &fragment) {
                    self.dispatch(inbound, now);
                }
            }
        }
    }

    fn on_connected(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) {
        self.online = true;
        self.sink.connection_changed(true);

        self.announce(outbox);
        if let Some(id) = self.presence_timer.take() {
            self.timers.cancel(id);
        }
        let interval = self.presence.interval();
        self.presence_timer = Some(self.timers.schedule_repeating(now + interval, interval, Tick::Presence));

        let topics = self.router.topics();
        send_device(topics, DeviceCommand::ListToday, outbox);
        send_device(topics, DeviceCommand::CheckUpdate, outbox);
        if let Some(student_id) = self.binding.student_id() {
            send_device(topics, DeviceCommand::StudentInfo { student_id }, outbox);
            send_device(topics, DeviceCommand::ListHomeworks { student_id }, outbox);
        }
        self.arm_midnight(now);
    }

    fn dispatch(&mut self, inbound: Inbound, now: Instant) {
        match inbound {
            Inbound::Roster(roster) => match self.roster_gate.offer(now, roster) {
                Gate::Apply(roster) => self.apply_roster(roster),
                Gate::Deferred { until, rearm } => {
                    debug!("kiosk: roster refresh deferred");
                    if rearm {
                        self.timers.schedule_once(until, Tick::RosterRefresh);
                    }
                }
            },
            Inbound::Homeworks(items) => {
                if self.binding.student_id().is_none() {
                    debug!("kiosk: homeworks ignored while unbound");
                    return;
                }
                match self.homework_gate.offer(now, items) {
                    Gate::Apply(items) => self.apply_homeworks(items, now),
                    Gate::Deferred { until, rearm } => {
                        debug!("kiosk: homework refresh deferred");
                        if rearm {
                            self.timers.schedule_once(until, Tick::HomeworkRefresh);
                        }
                    }
                }
            }
            Inbound::StudentInfo(info) => {
                if self.binding.student_id().is_none() {
                    debug!("kiosk: student info ignored while unbound");
                    return;
                }
                self.sink.student_info_changed(&info);
                self.student_info = Some(info);
            }
            Inbound::Update(status) => self.sink.update_status(&status),
            Inbound::DeviceAck(ack) => {
                self.sink.device_ack(&ack);
                if ack.action == "bind" && !ack.ok {
                    warn!("kiosk: backend rejected bind, keeping local binding");
                    self.sink
                        .bind_rejected(ack.student_id.as_deref(), ack.error.as_deref());
                }
            }
            Inbound::Ack { key, payload } => {
                trace!("kiosk: command {} acknowledged", key.as_str());
                self.sink.acknowledged(&key, &payload);
            }
        }
    }

    fn apply_roster(&mut self, roster: Vec<RosterEntry>) {
        debug!("kiosk: roster has {} students", roster.len());
        self.roster = roster;
        self.sink.roster_changed(&self.roster);
    }

    fn apply_homeworks(&mut self, items: Vec<HomeworkItem>, now: Instant) {
        self.homework.replace(items, &mut self.timers, now);
        self.sink.homeworks_changed(self.homework.items());
        for item in self.homework.items() {
            if item.phase == Phase::Performing
                && let Some(seconds) = self.homework.elapsed_seconds(&item.item_id, now)
            {
                self.sink.elapsed_changed(&item.item_id, seconds);
            }
        }
    }

    /// Binds the device to `student_id` and asks the backend for the
    /// student's details.
    pub fn select_student(
        &mut self,
        student_id: &str,
        now: Instant,
        outbox: &mut dyn PublishOutbox,
    ) -> Result<(), CommandError> {
        self.ensure_live()?;
        if student_id.is_empty() {
            return Err(CommandError::EmptyStudentId);
        }
        if !self.taps.try_accept(now) {
            return Err(CommandError::Debounced);
        }
        if self
            .binding
            .student_id()
            .is_some_and(|bound| bound != student_id)
        {
            self.drop_student_state();
        }
        self.binding.bind(student_id)?;
        info!("kiosk: bound to student {}", student_id);

        let topics = self.router.topics();
        send_device(topics, DeviceCommand::Bind { student_id }, outbox);
        send_device(topics, DeviceCommand::StudentInfo { student_id }, outbox);
        send_device(topics, DeviceCommand::ListHomeworks { student_id }, outbox);
        self.sink.mode_changed(UiMode::HomeworkPager);
        Ok(())
    }

    /// Requests whatever the tapped item's phase allows.
    pub fn tap_homework(
        &mut self,
        item_id: &str,
        now: Instant,
        outbox: &mut dyn PublishOutbox,
    ) -> Result<(), CommandError> {
        self.ensure_item_commands()?;
        let action = self.homework.action_for_tap(item_id)?;
        if !self.taps.try_accept(now) {
            return Err(CommandError::Debounced);
        }
        self.issue(action, item_id, outbox)
    }

    pub fn request_homework(
        &mut self,
        item_id: &str,
        action: HomeworkAction,
        now: Instant,
        outbox: &mut dyn PublishOutbox,
    ) -> Result<(), CommandError> {
        self.ensure_item_commands()?;
        self.homework.check_request(item_id, action)?;
        if !self.taps.try_accept(now) {
            return Err(CommandError::Debounced);
        }
        self.issue(action, item_id, outbox)
    }

    pub fn pause_all(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Result<(), CommandError> {
        self.ensure_item_commands()?;
        if !self.taps.try_accept(now) {
            return Err(CommandError::Debounced);
        }
        self.issue(HomeworkAction::PauseAll, ALL_ITEMS, outbox)
    }

    /// Unbinds, shows the farewell and schedules the restart.
    pub fn logout(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Result<(), CommandError> {
        if self.restart_pending {
            return Err(CommandError::RestartPending);
        }
        if self.binding.student_id().is_none() {
            return Err(CommandError::Unbound);
        }
        if !self.online {
            return Err(CommandError::Offline);
        }
        send_device(self.router.topics(), DeviceCommand::Unbind, outbox);
        self.binding.unbind();
        self.drop_student_state();
        info!("kiosk: logged out, restarting shortly");

        self.sink.mode_changed(UiMode::Roster);
        self.sink.farewell();
        self.restart_pending = true;
        self.timers
            .schedule_once(now + self.config.restart_delay, Tick::Restart);
        Ok(())
    }

    /// Allowed while unbound.
    pub fn check_update(&mut self, outbox: &mut dyn PublishOutbox) -> Result<(), CommandError> {
        self.ensure_live()?;
        send_device(self.router.topics(), DeviceCommand::CheckUpdate, outbox);
        Ok(())
    }

    pub fn refresh_roster(&mut self, outbox: &mut dyn PublishOutbox) -> Result<(), CommandError> {
        self.ensure_live()?;
        send_device(self.router.topics(), DeviceCommand::ListToday, outbox);
        Ok(())
    }

    /// Fires every due timer and returns the next deadline.
    pub fn poll(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Option<Instant> {
        while let Some((id, tick)) = self.timers.pop_due(now) {
            self.on_timer(id, tick, now, outbox);
        }
        self.timers.next_deadline()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn last_will(&self) -> LastWill {
        self.presence.last_will()
    }

    fn on_timer(&mut self, id: TimerId, tick: Tick, now: Instant, outbox: &mut dyn PublishOutbox) {
        match tick {
            Tick::Presence => {
                if self.online {
                    self.announce(outbox);
                }
                if self.midnight_timer.is_none() {
                    self.arm_midnight(now);
                }
            }
            Tick::Elapsed | Tick::Attention => match self.homework.on_timer(id, now) {
                Some(Signal::Elapsed { item_id, seconds }) => {
                    self.sink.elapsed_changed(item_id, seconds)
                }
                Some(Signal::Attention { item_id }) => self.sink.attention_pulse(item_id),
                None => trace!("kiosk: stale homework timer"),
            },
            Tick::RosterRefresh => {
                if let Some(roster) = self.roster_gate.take_due(now) {
                    self.apply_roster(roster);
                }
            }
            Tick::HomeworkRefresh => {
                if let Some(items) = self.homework_gate.take_due(now)
                    && self.binding.student_id().is_some()
                {
                    self.apply_homeworks(items, now);
                }
            }
            Tick::Restart => {
                info!("kiosk: requesting restart");
                self.sink.request_restart();
            }
            Tick::Midnight => {
                self.midnight_timer = None;
                info!("kiosk: local date changed");
                if self.online {
                    self.announce(outbox);
                    send_device(self.router.topics(), DeviceCommand::ListToday, outbox);
                }
                self.arm_midnight(now);
            }
        }
    }

    fn issue(
        &mut self,
        action: HomeworkAction,
        item_id: &str,
        outbox: &mut dyn PublishOutbox,
    ) -> Result<(), CommandError> {
        let student_id = self.binding.student_id().ok_or(CommandError::Unbound)?;
        let at = iso_timestamp(&self.clock);
        let command = self
            .commands
            .homework(self.router.topics(), action, student_id, item_id, &at)?;
        match command.payload() {
            Ok(payload) => {
                debug!(
                    "kiosk: {} on {} as {}",
                    action.as_str(),
                    item_id,
                    crate::fmt::dbg(&command.idempotency_key())
                );
                outbox.publish(command.topic(), &payload, COMMAND_QOS, false);
            }
            Err(_) => error!("kiosk: failed to encode {} command", action.as_str()),
        }
        Ok(())
    }

    fn announce(&self, outbox: &mut dyn PublishOutbox) {
        let at = iso_timestamp(&self.clock);
        match self.presence.heartbeat(&at) {
            Ok(payload) => outbox.publish(self.presence.topic(), &payload, PRESENCE_QOS, true),
            Err(_) => error!("kiosk: failed to encode presence"),
        }
    }

    fn arm_midnight(&mut self, now: Instant) {
        if let Some(id) = self.midnight_timer.take() {
            self.timers.cancel(id);
        }
        let Some(delay) = self
            .clock
            .now_utc()
            .and_then(|utc| until_rollover(utc, self.config.utc_offset_secs))
        else {
            return;
        };
        self.midnight_timer = Some(self.timers.schedule_once(now + delay, Tick::Midnight));
    }

    fn drop_student_state(&mut self) {
        self.homework.clear(&mut self.timers);
        self.homework_gate.clear();
        self.student_info = None;
    }

    fn ensure_live(&self) -> Result<(), CommandError> {
        if self.restart_pending {
            return Err(CommandError::RestartPending);
        }
        if !self.online {
            return Err(CommandError::Offline);
        }
        Ok(())
    }

    fn ensure_item_commands(&self) -> Result<(), CommandError> {
        if self.restart_pending {
            return Err(CommandError::RestartPending);
        }
        if self.binding.student_id().is_none() {
            return Err(CommandError::Unbound);
        }
        if !self.online {
            return Err(CommandError::Offline);
        }
        Ok(())
    }
}

fn send_device(topics: &Topics, command: DeviceCommand<'_>, outbox: &mut dyn PublishOutbox) {
    match command.payload() {
        Ok(payload) => outbox.publish(topics.device_command(), &payload, COMMAND_QOS, false),
        Err(_) => error!("kiosk: failed to encode device command"),
    }
}

impl<S, R, G, W> MqttModule for Kiosk<S, R, G, W>
where
    S: Storage,
    R: RenderSink,
    G: RngCore,
    W: WallClock,
{
    type Intent = UiIntent;

    fn register(&self, collector: &mut dyn TopicCollector) {
        for topic in self.router.topics().subscriptions() {
            collector.add(topic);
        }
    }

    fn last_will(&self) -> Option<LastWill> {
        Some(self.presence.last_will())
    }

    fn on_event(&mut self, event: LinkEvent<'_>, now: Instant, outbox: &mut dyn PublishOutbox) {
        self.handle_event(event, now, outbox);
    }

    fn on_intent(&mut self, intent: UiIntent, now: Instant, outbox: &mut dyn PublishOutbox) {
        let result = match intent {
            UiIntent::SelectStudent(student_id) => self.select_student(&student_id, now, outbox),
            UiIntent::TapHomework(item_id) => self.tap_homework(&item_id, now, outbox),
            UiIntent::Request { item_id, action } => {
                self.request_homework(&item_id, action, now, outbox)
            }
            UiIntent::PauseAll => self.pause_all(now, outbox),
            UiIntent::Logout => self.logout(now, outbox),
            UiIntent::CheckUpdate => self.check_update(outbox),
            UiIntent::RefreshRoster => self.refresh_roster(outbox),
        };
        if let Err(err) = result {
            debug!("kiosk: intent refused: {:?}", err);
            self.sink.command_rejected(err);
        }
    }

    fn on_tick(&mut self, now: Instant, outbox: &mut dyn PublishOutbox) -> Option<Instant> {
        self.poll(now, outbox)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }
}
