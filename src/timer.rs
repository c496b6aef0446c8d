use crate::member::MemberId;
use crate::result::Result;
use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use mio::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::channel::{Receiver, Sender};
use mio_extras::timer::{Builder, Timeout, Timer};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const TIMER_TOKEN: Token = Token(0);
const COMMAND_TOKEN: Token = Token(1);

/// Schedules member timeouts.
///
/// A member has at most one pending timeout: scheduling again replaces the previous one.
pub trait TimeoutScheduler: Send + Sync {
    /// Fires `(id, generation)` after `after` unless replaced or cancelled before.
    fn schedule(&self, id: &MemberId, generation: u64, after: Duration);

    /// Drops the pending timeout of `id`, if any.
    fn cancel(&self, id: &MemberId);
}

/// Handle of the timeout owned by a live member.
///
/// The generation identifies the arming; a fire carrying an older generation is stale.
#[derive(Debug, PartialEq, Eq)]
pub struct TimeoutTimer {
    generation: u64,
}

impl TimeoutTimer {
    pub(crate) fn arm(scheduler: &dyn TimeoutScheduler, id: &MemberId, generation: u64, after: Duration) -> Self {
        scheduler.schedule(id, generation, after);
        TimeoutTimer { generation }
    }

    pub(crate) fn reset(&mut self, scheduler: &dyn TimeoutScheduler, id: &MemberId, generation: u64, after: Duration) {
        debug_assert!(generation > self.generation);
        scheduler.schedule(id, generation, after);
        self.generation = generation;
    }

    pub(crate) fn cancel(self, scheduler: &dyn TimeoutScheduler, id: &MemberId) {
        scheduler.cancel(id);
    }

    /// Generation of the current arming.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub(crate) enum TimerCommand {
    Schedule {
        id: MemberId,
        generation: u64,
        after: Duration,
    },
    Cancel(MemberId),
    Stop,
}

/// Scheduler feeding commands to a `TimerThread`.
pub(crate) struct ChannelScheduler {
    sender: Mutex<Sender<TimerCommand>>,
}

impl ChannelScheduler {
    fn send(&self, command: TimerCommand) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = sender.send(command) {
            warn!("Timer command was not delivered: {:?}", e);
        }
    }
}

impl TimeoutScheduler for ChannelScheduler {
    fn schedule(&self, id: &MemberId, generation: u64, after: Duration) {
        self.send(TimerCommand::Schedule {
            id: id.clone(),
            generation,
            after,
        });
    }

    fn cancel(&self, id: &MemberId) {
        self.send(TimerCommand::Cancel(id.clone()));
    }
}

/// Command queue of a `TimerThread` that is not spawned yet.
pub(crate) struct TimerCommands {
    sender: Sender<TimerCommand>,
    receiver: Receiver<TimerCommand>,
}

/// Creates the scheduler and the queue to hand to `TimerThread::spawn`.
///
/// Commands sent before the thread is spawned are buffered.
pub(crate) fn channel() -> (ChannelScheduler, TimerCommands) {
    let (sender, receiver) = mio_extras::channel::channel();
    (
        ChannelScheduler {
            sender: Mutex::new(sender.clone()),
        },
        TimerCommands { sender, receiver },
    )
}

/// Runs member timeouts on a dedicated thread.
pub(crate) struct TimerThread {
    sender: Mutex<Sender<TimerCommand>>,
    handle: Option<std::thread::JoinHandle<Result<()>>>,
}

impl TimerThread {
    pub(crate) fn spawn<F>(commands: TimerCommands, tick: Duration, on_expired: F) -> Result<Self>
    where
        F: Fn(MemberId, u64) + Send + 'static,
    {
        let TimerCommands { sender, receiver } = commands;
        let mut wheel = TimerWheel::new(receiver, tick, on_expired);
        let handle = std::thread::Builder::new()
            .name("membership-timer".to_string())
            .spawn(move || wheel.run())
            .context("Failed to spawn timer thread")?;
        Ok(TimerThread {
            sender: Mutex::new(sender),
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        // The thread may already be gone, joining reports why.
        let sender = self.sender.get_mut().unwrap_or_else(|e| e.into_inner());
        let _ = sender.send(TimerCommand::Stop);
        handle
            .join()
            .map_err(|e| anyhow!("Timer thread panicked: {:?}", e))?
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Timer thread stopped with error: {:?}", e);
        }
    }
}

struct TimerWheel<F> {
    receiver: Receiver<TimerCommand>,
    timer: Timer<(MemberId, u64)>,
    pending: HashMap<MemberId, (u64, Timeout)>,
    on_expired: F,
}

impl<F> TimerWheel<F>
where
    F: Fn(MemberId, u64),
{
    fn new(receiver: Receiver<TimerCommand>, tick: Duration, on_expired: F) -> Self {
        TimerWheel {
            receiver,
            timer: Builder::default().tick_duration(tick).build(),
            pending: HashMap::new(),
            on_expired,
        }
    }

    fn run(&mut self) -> Result<()> {
        let poll = Poll::new().context("Failed to create timer poll")?;
        poll.register(&self.timer, TIMER_TOKEN, Ready::readable(), PollOpt::edge())
            .context("Failed to register timer for polling")?;
        poll.register(&self.receiver, COMMAND_TOKEN, Ready::readable(), PollOpt::edge())
            .context("Failed to register timer commands for polling")?;
        info!("Timer thread started");

        let mut events = Events::with_capacity(64);
        'mainloop: loop {
            poll.poll(&mut events, Some(Duration::from_millis(100)))
                .context("Failed to poll timer events")?;
            for event in events.iter() {
                match event.token() {
                    TIMER_TOKEN => self.expire(),
                    COMMAND_TOKEN => {
                        if !self.handle_commands() {
                            break 'mainloop;
                        }
                    }
                    _ => unreachable!(),
                }
            }
        }

        info!("Timer thread stopped");
        Ok(())
    }

    // Returns false once asked to stop.
    fn handle_commands(&mut self) -> bool {
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                TimerCommand::Schedule { id, generation, after } => {
                    let timeout = self.timer.set_timeout(after, (id.clone(), generation));
                    if let Some((_, replaced)) = self.pending.insert(id, (generation, timeout)) {
                        self.timer.cancel_timeout(&replaced);
                    }
                }
                TimerCommand::Cancel(id) => {
                    if let Some((_, timeout)) = self.pending.remove(&id) {
                        self.timer.cancel_timeout(&timeout);
                    }
                }
                TimerCommand::Stop => return false,
            }
        }
        true
    }

    fn expire(&mut self) {
        while let Some((id, generation)) = self.timer.poll() {
            if let Some(&(current, _)) = self.pending.get(&id) {
                if current == generation {
                    self.pending.remove(&id);
                }
            }
            debug!("Timeout of {} (generation {}) fired", id, generation);
            (self.on_expired)(id, generation);
        }
    }
}
