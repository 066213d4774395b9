//! Command scheduling.
//!
//! Every outbound command goes through [`start_sequence`]: a [`CommandSequence`] is a
//! list of `(offset, command)` steps. Steps at offset zero are written immediately
//! while the caller still holds the state lock, so relative adjustments always read
//! the value they were computed from. Later steps run on a timer task bound to the
//! current socket session and are skipped once that session ends.

use crate::action::{level, source_number, Action, Reply, Step, StepTarget};
use crate::bridge::{Inner, Shared};
use crate::connection;
use crate::error::{BridgeError, Result};
use crate::protocol::Command;
use crate::state::DeviceState;
use crate::types::{Db, EqBand, InputIndex, GAIN_RANGE, INPUT_COUNT, VOLUME_RANGE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Confirm delay after power, source and level sets
const SLOW_CONFIRM: Duration = Duration::from_millis(250);
/// Confirm delay after mute and mix switches
const FAST_CONFIRM: Duration = Duration::from_millis(100);

/// Declarative multi-step command plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSequence {
    steps: Vec<(Duration, Command)>,
}

impl CommandSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `command` at `offset` from the start of the sequence
    pub fn at(mut self, offset: Duration, command: Command) -> Self {
        self.steps.push((offset, command));
        self.steps.sort_by_key(|(offset, _)| *offset);
        self
    }

    /// Send `set` now and query the same field after `delay`
    pub fn confirmed(set: Command, query: Command, delay: Duration) -> Self {
        Self::new().at(Duration::ZERO, set).at(delay, query)
    }

    /// Queries spaced `spacing` apart, in order
    pub fn spaced(commands: impl IntoIterator<Item = Command>, spacing: Duration) -> Self {
        let steps = commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| (spacing * i as u32, command))
            .collect();
        Self { steps }
    }

    /// Query every field the bridge mirrors
    pub fn full_status(spacing: Duration) -> Self {
        let mut queries = vec![
            Command::PowerQuery,
            Command::VolumeQuery,
            Command::SourceQuery,
            Command::MuteQuery,
            Command::MixModeQuery,
            Command::MixVolumeQuery,
            Command::MixMuteQuery,
        ];
        queries.extend(
            (1..=INPUT_COUNT as i64)
                .filter_map(|n| InputIndex::new(n).ok())
                .map(Command::InputGainQuery),
        );
        queries.extend(EqBand::ALL.into_iter().map(Command::EqQuery));
        Self::spaced(queries, spacing)
    }

    /// The background poll: power, volume and source only
    pub fn light_status(spacing: Duration) -> Self {
        Self::spaced(
            [Command::PowerQuery, Command::VolumeQuery, Command::SourceQuery],
            spacing,
        )
    }

    pub fn steps(&self) -> &[(Duration, Command)] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Run a sequence against the current session.
///
/// Zero-offset steps are sent before returning; the rest fire from a spawned task
/// that checks the session is still live at each step.
pub(crate) fn start_sequence(shared: &Arc<Shared>, inner: &mut Inner, sequence: CommandSequence) {
    let session = inner.link.session().clone();
    let start = Instant::now();

    let mut steps = sequence.steps.into_iter().peekable();
    while let Some((_, command)) = steps.next_if(|(offset, _)| offset.is_zero()) {
        send_or_skip(inner, &command);
    }

    let delayed: Vec<(Duration, Command)> = steps.collect();
    if delayed.is_empty() || session.is_cancelled() {
        return;
    }

    let shared = shared.clone();
    tokio::spawn(async move {
        for (offset, command) in delayed {
            tokio::select! {
                _ = sleep_until(start + offset) => {}
                _ = session.cancelled() => return,
            }
            let inner = shared.inner.lock().await;
            if session.is_cancelled() {
                return;
            }
            send_or_skip(&inner, &command);
        }
    });
}

fn send_or_skip(inner: &Inner, command: &Command) {
    if let Err(e) = inner.link.send(command) {
        tracing::debug!("Skipping {}: {}", command, e);
    }
}

/// Entry point for client actions
pub(crate) async fn submit(shared: &Arc<Shared>, action: Action) -> Result<Reply> {
    action.validate()?;
    tracing::debug!("Action: {:?}", action);

    match action {
        Action::GetState => Ok(Reply::State(shared.inner.lock().await.store.snapshot())),
        Action::ConnectionStatus => {
            let inner = shared.inner.lock().await;
            Ok(Reply::ConnectionStatus(connection::status(shared, &inner)))
        }
        Action::Ping => Ok(Reply::Pong),
        Action::Connect => {
            connection::connect(shared).await;
            Ok(Reply::Accepted)
        }
        Action::Disconnect => {
            connection::disconnect(shared).await;
            Ok(Reply::Accepted)
        }
        Action::ConnectionToggle => {
            connection::toggle(shared).await;
            Ok(Reply::Accepted)
        }
        Action::HoldStart { control, input } => hold_start(shared, control.step(input)?).await,
        Action::HoldStop { control, input } => hold_stop(shared, control.step(input)?).await,
        action => {
            let mut inner = shared.inner.lock().await;
            ensure_connected(&inner)?;
            let sequence = plan(&action, inner.store.state(), shared.config.poll_step)?;
            if sequence.is_empty() {
                tracing::debug!("{:?} is already at its limit", action);
            }
            start_sequence(shared, &mut inner, sequence);
            Ok(Reply::Accepted)
        }
    }
}

fn ensure_connected(inner: &Inner) -> Result<()> {
    if inner.link.is_connected() {
        Ok(())
    } else if inner.reconnect.exhausted {
        Err(BridgeError::ReconnectExhausted {
            attempts: inner.reconnect.attempts,
        })
    } else {
        Err(BridgeError::NotConnected)
    }
}

/// Commands a device action turns into, given the current state
pub(crate) fn plan(
    action: &Action,
    state: &DeviceState,
    poll_step: Duration,
) -> Result<CommandSequence> {
    if let Some(step) = action.step()? {
        return Ok(step_sequence(step, state));
    }

    let slow = |set, query| CommandSequence::confirmed(set, query, SLOW_CONFIRM);
    let fast = |set, query| CommandSequence::confirmed(set, query, FAST_CONFIRM);

    let sequence = match action {
        Action::PowerOn => slow(Command::Power(true), Command::PowerQuery),
        Action::PowerOff => slow(Command::Power(false), Command::PowerQuery),
        Action::PowerToggle => slow(Command::Power(!state.power), Command::PowerQuery),
        Action::SourceSelect { source } => CommandSequence::confirmed(
            Command::Source(source_number(*source)?),
            Command::SourceQuery,
            SLOW_CONFIRM,
        ),
        Action::VolumeSet { value } => CommandSequence::confirmed(
            Command::Volume(level(VOLUME_RANGE, "volume", *value)?),
            Command::VolumeQuery,
            SLOW_CONFIRM,
        ),
        Action::MuteOn => fast(Command::Mute(true), Command::MuteQuery),
        Action::MuteOff => fast(Command::Mute(false), Command::MuteQuery),
        Action::MuteToggle => fast(Command::Mute(!state.mute), Command::MuteQuery),
        Action::MixModeToggle => CommandSequence::confirmed(
            Command::MixMode(!state.mix_mode_enabled),
            Command::MixModeQuery,
            FAST_CONFIRM,
        ),
        Action::MixVolumeSet { value } => CommandSequence::confirmed(
            Command::MixVolume(level(VOLUME_RANGE, "mix volume", *value)?),
            Command::MixVolumeQuery,
            SLOW_CONFIRM,
        ),
        Action::MixMuteToggle => CommandSequence::confirmed(
            Command::MixMute(!state.mix_mute),
            Command::MixMuteQuery,
            FAST_CONFIRM,
        ),
        Action::InputGainSet { input, value } => {
            let input = InputIndex::new(*input)?;
            CommandSequence::confirmed(
                Command::InputGain(input, level(GAIN_RANGE, "gain", *value)?),
                Command::InputGainQuery(input),
                SLOW_CONFIRM,
            )
        }
        Action::EqSet { band, value } => CommandSequence::confirmed(
            Command::Eq(*band, level(GAIN_RANGE, "eq", *value)?),
            Command::EqQuery(*band),
            SLOW_CONFIRM,
        ),
        Action::PollStatus => CommandSequence::full_status(poll_step),
        other => {
            return Err(BridgeError::InvalidParameter(format!(
                "{:?} is not a device command",
                other
            )))
        }
    };

    Ok(sequence)
}

/// Set-then-query for one relative step; empty at the range edge
fn step_sequence(step: Step, state: &DeviceState) -> CommandSequence {
    match step.next_value(state) {
        Some(value) => {
            let (set, query) = step_commands(step.target, value);
            CommandSequence::new()
                .at(Duration::ZERO, set)
                .at(Duration::ZERO, query)
        }
        None => CommandSequence::new(),
    }
}

fn step_commands(target: StepTarget, value: Db) -> (Command, Command) {
    match target {
        StepTarget::Volume => (Command::Volume(value), Command::VolumeQuery),
        StepTarget::MixVolume => (Command::MixVolume(value), Command::MixVolumeQuery),
        StepTarget::InputGain(input) => {
            (Command::InputGain(input, value), Command::InputGainQuery(input))
        }
        StepTarget::Eq(band) => (Command::Eq(band, value), Command::EqQuery(band)),
    }
}

fn perform_step(shared: &Arc<Shared>, inner: &mut Inner, step: Step) {
    let sequence = step_sequence(step, inner.store.state());
    if sequence.is_empty() {
        tracing::debug!("Hold {:?} at limit", step);
        return;
    }
    start_sequence(shared, inner, sequence);
}

/// Begin a press-and-hold repeat. A second start for the same step is a no-op.
async fn hold_start(shared: &Arc<Shared>, step: Step) -> Result<Reply> {
    let mut inner = shared.inner.lock().await;
    ensure_connected(&inner)?;

    if inner.holds.contains_key(&step) {
        tracing::debug!("Hold {:?} already active", step);
        return Ok(Reply::Accepted);
    }

    let token = inner.link.session().child_token();
    inner.holds.insert(step, token.clone());
    perform_step(shared, &mut inner, step);
    drop(inner);

    tokio::spawn(repeat_hold(shared.clone(), step, token));
    Ok(Reply::Accepted)
}

async fn hold_stop(shared: &Arc<Shared>, step: Step) -> Result<Reply> {
    if let Some(token) = shared.inner.lock().await.holds.remove(&step) {
        token.cancel();
        tracing::debug!("Hold {:?} released", step);
    }
    Ok(Reply::Accepted)
}

async fn repeat_hold(shared: Arc<Shared>, step: Step, token: CancellationToken) {
    let timing = shared.config.hold.clone();

    tokio::select! {
        _ = sleep(timing.initial_delay) => {}
        _ = token.cancelled() => return,
    }

    let mut ticker = interval_at(Instant::now() + timing.repeat_interval, timing.repeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = token.cancelled() => return,
        }
        let mut inner = shared.inner.lock().await;
        // Released while this tick waited for the lock
        if token.is_cancelled() {
            return;
        }
        perform_step(&shared, &mut inner, step);
    }
}

/// Light status poll every `poll_interval` while connected
pub(crate) async fn run_background_poll(shared: Arc<Shared>) {
    let period = shared.config.poll_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shared.shutdown.cancelled() => break,
        }
        let mut inner = shared.inner.lock().await;
        if inner.link.is_connected() {
            let poll = CommandSequence::light_status(shared.config.poll_step);
            start_sequence(&shared, &mut inner, poll);
        }
    }
}
