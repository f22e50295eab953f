// Dual-board coordinator
//
// Owns the two link state machines and everything that spans them: the
// platform-ready signal, the motor command cache, and the alternating
// battery poll. Runs as a single event loop so link events from either
// board can never race on shared state.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tracing::{debug, info};

use crate::bcore::link::{Link, LinkSignal};
use crate::bcore::transport::LinkEvent;
use crate::bcore::{Board, MotorSlot};
use crate::config;
use crate::kinematics::{self, NEUTRAL_POWER};
use crate::messages::{DriveCommand, PlatformEvent};

/// External commands accepted by the coordinator loop.
#[derive(Debug)]
pub enum CoordinatorCommand {
    Connect,
    Disconnect,
    Drive { command: DriveCommand, force: bool },
}

pub struct Coordinator<C> {
    front: Link<C>,
    rear: Link<C>,
    /// Last byte sent per motor slot, indexed by `MotorSlot as usize`.
    /// Authoritative only while the owning board is connected.
    cache: [u8; 4],
    ready: bool,
    /// Next board the battery poll will read.
    poll_cursor: Board,
    /// Armed while the poll cycle is sitting out the rear deferral.
    poll_at: Option<Instant>,
    retry_front_at: Option<Instant>,
    retry_rear_at: Option<Instant>,
    /// Entry timestamp of the last applied motor update.
    last_applied: Option<Instant>,
    events: UnboundedSender<PlatformEvent>,
}

impl<C: Clone> Coordinator<C> {
    pub fn new(front: Link<C>, rear: Link<C>, events: UnboundedSender<PlatformEvent>) -> Self {
        Self {
            front,
            rear,
            cache: [NEUTRAL_POWER; 4],
            ready: false,
            poll_cursor: Board::Front,
            poll_at: None,
            retry_front_at: None,
            retry_rear_at: None,
            last_applied: None,
            events,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Bring both links up; idempotent per link.
    pub fn connect(&mut self) {
        self.front.connect();
        self.rear.connect();
    }

    /// Operator shutdown: both links down, poll and retries cancelled.
    pub fn disconnect(&mut self) {
        self.front.disconnect();
        self.rear.disconnect();
        self.poll_at = None;
        self.retry_front_at = None;
        self.retry_rear_at = None;
        self.cache = [NEUTRAL_POWER; 4];
        self.update_ready();
    }

    fn link(&self, board: Board) -> &Link<C> {
        match board {
            Board::Front => &self.front,
            Board::Rear => &self.rear,
        }
    }

    fn link_mut(&mut self, board: Board) -> &mut Link<C> {
        match board {
            Board::Front => &mut self.front,
            Board::Rear => &mut self.rear,
        }
    }

    pub fn handle_link_event(&mut self, board: Board, event: LinkEvent<C>) {
        match self.link_mut(board).handle_event(event) {
            Some(LinkSignal::Up) => self.update_ready(),
            Some(LinkSignal::Down) => self.handle_link_down(board),
            Some(LinkSignal::RetryAfter(pause)) => {
                let deadline = Instant::now() + pause;
                match board {
                    Board::Front => self.retry_front_at = Some(deadline),
                    Board::Rear => self.retry_rear_at = Some(deadline),
                }
            }
            Some(LinkSignal::Battery(voltage)) => {
                let _ = self
                    .events
                    .send(PlatformEvent::BatteryVoltage { board, voltage });
                match board {
                    // Front read done: chase it with the rear read right away.
                    Board::Front => self.poll_step(),
                    // Rear telemetry is less time-critical; sit out the
                    // deferral before resuming with the front board.
                    Board::Rear => {
                        self.poll_at = Some(Instant::now() + config::REAR_BATTERY_DEFERRAL);
                    }
                }
            }
            None => {}
        }
    }

    fn handle_link_down(&mut self, board: Board) {
        // The downed board's motors are physically stopped already; its
        // cache is meaningless until the next reconnect.
        for slot in board.slots() {
            self.cache[slot as usize] = NEUTRAL_POWER;
        }
        // Half a platform cannot drive safely: stop the side we can still
        // reach rather than leave stale PWM applied.
        if self.link(board.opposite()).is_connected() {
            info!("{} link down, stopping {} motors", board, board.opposite());
            for slot in board.opposite().slots() {
                self.link(board.opposite())
                    .write_motor(slot.index(), NEUTRAL_POWER);
                self.cache[slot as usize] = NEUTRAL_POWER;
            }
        }
        self.update_ready();
    }

    /// Recompute readiness and act on the edge, if any.
    fn update_ready(&mut self) {
        let now_ready = self.front.is_connected() && self.rear.is_connected();
        if now_ready == self.ready {
            return;
        }
        self.ready = now_ready;
        info!(
            "platform {}",
            if now_ready { "ready" } else { "not ready" }
        );
        let _ = self.events.send(PlatformEvent::ConnectionChanged(now_ready));
        self.poll_at = None;
        if now_ready {
            // First motor update after the edge applies immediately.
            self.last_applied = None;
            self.poll_cursor = Board::Front;
            self.poll_step();
        }
    }

    /// Issue the next battery read if the cursor board is reachable. The
    /// cursor only advances when a read actually goes out; a cycle that
    /// lands on an unreachable board stalls until the next ready edge.
    fn poll_step(&mut self) {
        let board = self.poll_cursor;
        if self.link(board).is_connected() {
            self.link(board).read_battery();
            self.poll_cursor = board.opposite();
        }
    }

    /// Apply a drive intent: mix, suppress unchanged slots, pace the rest.
    pub async fn set_motor_speed(&mut self, command: DriveCommand, force: bool) {
        if !self.ready {
            return;
        }
        let now = Instant::now();
        if !force
            && let Some(last) = self.last_applied
            && now.duration_since(last) < config::MOTOR_UPDATE_GATE
        {
            return;
        }

        let powers = kinematics::mix(command.fb, command.lr, command.rotate).as_array();
        let mut wrote = false;
        for slot in MotorSlot::WRITE_ORDER {
            let power = powers[slot as usize];
            if power == self.cache[slot as usize] {
                continue;
            }
            if wrote {
                // The boards drop writes that arrive too fast; pace between
                // consecutive writes, never after the last one.
                sleep(config::MOTOR_WRITE_SPACING).await;
            }
            self.link(slot.board()).write_motor(slot.index(), power);
            self.cache[slot as usize] = power;
            wrote = true;
        }
        if wrote {
            debug!(
                "motor powers LF:{}/RF:{}/LB:{}/RB:{}",
                powers[0], powers[1], powers[2], powers[3]
            );
        }
        self.last_applied = Some(now);
    }

    /// Single-threaded event loop: external commands, link events from both
    /// boards, and the coordinator's own timers.
    pub async fn run(
        mut self,
        mut commands: UnboundedReceiver<CoordinatorCommand>,
        mut link_events: UnboundedReceiver<(Board, LinkEvent<C>)>,
    ) {
        loop {
            let poll_at = self.poll_at;
            let retry_front_at = self.retry_front_at;
            let retry_rear_at = self.retry_rear_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CoordinatorCommand::Connect) => self.connect(),
                    Some(CoordinatorCommand::Disconnect) => self.disconnect(),
                    Some(CoordinatorCommand::Drive { command, force }) => {
                        self.set_motor_speed(command, force).await;
                    }
                    None => break,
                },
                event = link_events.recv() => match event {
                    Some((board, event)) => self.handle_link_event(board, event),
                    None => break,
                },
                _ = sleep_until(poll_at.unwrap_or_else(far_future)), if poll_at.is_some() => {
                    self.poll_at = None;
                    self.poll_step();
                }
                _ = sleep_until(retry_front_at.unwrap_or_else(far_future)), if retry_front_at.is_some() => {
                    self.retry_front_at = None;
                    self.front.connect();
                }
                _ = sleep_until(retry_rear_at.unwrap_or_else(far_future)), if retry_rear_at.is_some() => {
                    self.retry_rear_at = None;
                    self.rear.connect();
                }
            }
        }
    }
}

// Disabled select! timer arms still construct their sleep future.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::advance;

    use crate::bcore::transport::{BcoreCharacteristics, IoCommand};

    use super::*;

    type TestChar = &'static str;

    struct Harness {
        coordinator: Coordinator<TestChar>,
        front_io: UnboundedReceiver<IoCommand<TestChar>>,
        rear_io: UnboundedReceiver<IoCommand<TestChar>>,
        events: UnboundedReceiver<PlatformEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (front_tx, front_io) = mpsc::unbounded_channel();
            let (rear_tx, rear_io) = mpsc::unbounded_channel();
            let (event_tx, events) = mpsc::unbounded_channel();
            Self {
                coordinator: Coordinator::new(
                    Link::new(Board::Front, front_tx),
                    Link::new(Board::Rear, rear_tx),
                    event_tx,
                ),
                front_io,
                rear_io,
                events,
            }
        }

        fn io(&mut self, board: Board) -> &mut UnboundedReceiver<IoCommand<TestChar>> {
            match board {
                Board::Front => &mut self.front_io,
                Board::Rear => &mut self.rear_io,
            }
        }

        fn drain_io(&mut self, board: Board) -> Vec<IoCommand<TestChar>> {
            let mut commands = Vec::new();
            while let Ok(command) = self.io(board).try_recv() {
                commands.push(command);
            }
            commands
        }

        fn drain_events(&mut self) -> Vec<PlatformEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn writes(&mut self, board: Board) -> Vec<[u8; 2]> {
            self.drain_io(board)
                .into_iter()
                .filter_map(|command| match command {
                    IoCommand::Write(_, payload) => Some(payload),
                    _ => None,
                })
                .collect()
        }

        fn bring_board_up(&mut self, board: Board) {
            self.coordinator.handle_link_event(board, LinkEvent::Connected);
            self.coordinator.handle_link_event(
                board,
                LinkEvent::Discovered(Ok(BcoreCharacteristics {
                    battery: "battery",
                    motor: "motor",
                })),
            );
        }

        fn bring_up(&mut self) {
            self.coordinator.connect();
            self.bring_board_up(Board::Front);
            self.bring_board_up(Board::Rear);
            self.drain_io(Board::Front);
            self.drain_io(Board::Rear);
            self.drain_events();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_edge_fires_exactly_once() {
        let mut h = Harness::new();
        h.coordinator.connect();
        h.bring_board_up(Board::Front);
        assert!(h.drain_events().is_empty());

        h.bring_board_up(Board::Rear);
        assert_eq!(h.drain_events(), vec![PlatformEvent::ConnectionChanged(true)]);
        assert!(h.coordinator.is_ready());

        // Duplicate transport chatter while stable must not re-fire.
        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::Connected);
        assert!(h.drain_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_edge_kicks_off_a_front_battery_read() {
        let mut h = Harness::new();
        h.coordinator.connect();
        h.bring_board_up(Board::Front);
        h.bring_board_up(Board::Rear);

        let front = h.drain_io(Board::Front);
        assert!(front.contains(&IoCommand::Read("battery")));
        let rear = h.drain_io(Board::Rear);
        assert!(!rear.iter().any(|c| matches!(c, IoCommand::Read(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn battery_poll_alternates_with_rear_deferral() {
        let mut h = Harness::new();
        h.bring_up();

        // Front read completes: the rear read goes out immediately.
        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::BatteryRead(Ok(vec![0x22, 0x0A])));
        assert_eq!(
            h.drain_events(),
            vec![PlatformEvent::BatteryVoltage {
                board: Board::Front,
                voltage: 0x0A22,
            }]
        );
        assert_eq!(h.drain_io(Board::Rear), vec![IoCommand::Read("battery")]);
        assert!(h.coordinator.poll_at.is_none());

        // Rear read completes: nothing until the deferral elapses.
        h.coordinator
            .handle_link_event(Board::Rear, LinkEvent::BatteryRead(Ok(vec![0x10, 0x0A])));
        assert!(h.drain_io(Board::Front).is_empty());
        let deadline = h.coordinator.poll_at.expect("deferral armed");
        assert!(deadline >= Instant::now() + config::REAR_BATTERY_DEFERRAL - Duration::from_secs(1));

        // Deferral fires: the front read resumes the cycle.
        advance(config::REAR_BATTERY_DEFERRAL).await;
        h.coordinator.poll_at = None;
        h.coordinator.poll_step();
        assert_eq!(h.drain_io(Board::Front), vec![IoCommand::Read("battery")]);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_cancels_the_poll_cycle() {
        let mut h = Harness::new();
        h.bring_up();
        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::BatteryRead(Ok(vec![0, 1])));
        h.coordinator
            .handle_link_event(Board::Rear, LinkEvent::BatteryRead(Ok(vec![0, 1])));
        assert!(h.coordinator.poll_at.is_some());

        h.coordinator
            .handle_link_event(Board::Rear, LinkEvent::Disconnected);
        assert!(h.coordinator.poll_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn first_drive_after_ready_applies_immediately() {
        let mut h = Harness::new();
        h.bring_up();

        h.coordinator
            .set_motor_speed(DriveCommand { fb: 0.5, lr: 0.0, rotate: 0.0 }, false)
            .await;
        // LF 192 / RF 64 on front, LB 64 / RB 192 on rear.
        assert_eq!(h.writes(Board::Front), vec![[0, 192], [1, 64]]);
        assert_eq!(h.writes(Board::Rear), vec![[0, 192], [1, 64]]);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_intent_issues_no_further_writes() {
        let mut h = Harness::new();
        h.bring_up();
        let command = DriveCommand { fb: 0.5, lr: 0.0, rotate: 0.0 };

        h.coordinator.set_motor_speed(command, false).await;
        h.drain_io(Board::Front);
        h.drain_io(Board::Rear);

        // Immediately again, and again after the gate has passed: the cache
        // suppresses every slot both times.
        h.coordinator.set_motor_speed(command, false).await;
        advance(Duration::from_millis(50)).await;
        h.coordinator.set_motor_speed(command, false).await;
        assert!(h.writes(Board::Front).is_empty());
        assert!(h.writes(Board::Rear).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_gate_skips_changed_intent_within_window() {
        let mut h = Harness::new();
        h.bring_up();

        // Neutral intent on a neutral cache: applies (stamps the gate)
        // without writing anything.
        h.coordinator
            .set_motor_speed(DriveCommand::stop(), false)
            .await;
        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.0 }, false)
            .await;
        assert!(h.writes(Board::Front).is_empty());
        assert!(h.writes(Board::Rear).is_empty());

        advance(Duration::from_millis(50)).await;
        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.0 }, false)
            .await;
        assert_eq!(h.writes(Board::Front), vec![[0, 255], [1, 0]]);
        assert_eq!(h.writes(Board::Rear), vec![[0, 255], [1, 0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn force_overrides_the_rate_gate() {
        let mut h = Harness::new();
        h.bring_up();

        h.coordinator
            .set_motor_speed(DriveCommand::stop(), false)
            .await;
        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.0 }, true)
            .await;
        assert_eq!(h.writes(Board::Front), vec![[0, 255], [1, 0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn rotate_delta_touching_two_slots_issues_two_writes() {
        let mut h = Harness::new();
        h.bring_up();

        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.0 }, false)
            .await;
        h.drain_io(Board::Front);
        h.drain_io(Board::Rear);

        // Adding rotate = 0.5 only moves LF (255 -> 192) and LB (0 -> 64);
        // RF and RB stay saturated and must be skipped.
        advance(Duration::from_millis(50)).await;
        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.5 }, false)
            .await;
        assert_eq!(h.writes(Board::Front), vec![[0, 192]]);
        assert_eq!(h.writes(Board::Rear), vec![[1, 64]]);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_is_a_noop_while_not_ready() {
        let mut h = Harness::new();
        h.coordinator.connect();
        h.bring_board_up(Board::Front);
        h.drain_io(Board::Front);

        h.coordinator
            .set_motor_speed(DriveCommand { fb: 1.0, lr: 0.0, rotate: 0.0 }, true)
            .await;
        assert!(h.writes(Board::Front).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_one_board_stops_the_other() {
        let mut h = Harness::new();
        h.bring_up();

        h.coordinator
            .set_motor_speed(DriveCommand { fb: 0.5, lr: 0.0, rotate: 0.0 }, false)
            .await;
        h.drain_io(Board::Front);
        h.drain_io(Board::Rear);

        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::Disconnected);

        // Exactly two neutral writes, both aimed at the surviving rear board.
        assert_eq!(h.writes(Board::Rear), vec![[0, 128], [1, 128]]);
        // The front board reconnects but is not written to.
        let front = h.drain_io(Board::Front);
        assert_eq!(front, vec![IoCommand::Connect]);
        // Every cached power is back to neutral.
        assert_eq!(h.coordinator.cache, [NEUTRAL_POWER; 4]);
        assert_eq!(
            h.drain_events(),
            vec![PlatformEvent::ConnectionChanged(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_arms_a_retry_timer() {
        let mut h = Harness::new();
        h.coordinator.connect();
        h.drain_io(Board::Front);

        h.coordinator.handle_link_event(
            Board::Front,
            LinkEvent::ConnectFailed(crate::bcore::TransportError::BoardNotFound(Board::Front)),
        );
        assert!(h.coordinator.retry_front_at.is_some());
        assert!(h.drain_io(Board::Front).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn operator_disconnect_cancels_everything() {
        let mut h = Harness::new();
        h.bring_up();
        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::BatteryRead(Ok(vec![0, 1])));
        h.coordinator
            .handle_link_event(Board::Rear, LinkEvent::BatteryRead(Ok(vec![0, 1])));
        assert!(h.coordinator.poll_at.is_some());

        h.coordinator.disconnect();
        assert!(h.coordinator.poll_at.is_none());
        assert!(!h.coordinator.is_ready());
        assert_eq!(
            h.drain_events(),
            vec![PlatformEvent::ConnectionChanged(false)]
        );

        // Transport teardown events must not trigger a reconnect.
        h.drain_io(Board::Front);
        h.coordinator
            .handle_link_event(Board::Front, LinkEvent::Disconnected);
        assert!(h.drain_io(Board::Front).is_empty());
    }
}
