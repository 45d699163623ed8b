//! The tick source: time accounting, quantum expiry, and alarms.
use crate::{
    cfg::NR_TOTAL,
    endpoint::task_slot,
    message::{Message, SYN_ALARM},
    proc::CLOCK,
    state::State,
    Port,
};

/// What happened during a call to [`Kernel::clock_tick`].
///
/// [`Kernel::clock_tick`]: crate::Kernel::clock_tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    /// The tick count after the tick.
    pub realtime: u64,
    /// The running process used up its quantum and was rotated.
    pub quantum_expired: bool,
    /// The number of `SYN_ALARM` notifications issued.
    pub alarms_fired: usize,
    /// The number of expired alarms whose notification was lost because the
    /// notification pool was exhausted.
    pub alarms_dropped: usize,
}

impl State {
    pub(crate) fn clock_tick(&mut self, port: &impl Port) -> TickReport {
        self.realtime += 1;
        let mut report = TickReport {
            realtime: self.realtime,
            ..TickReport::default()
        };

        let running = self.running;
        let kind = self.procs[running].kind;
        self.procs[running].user_time += 1;
        if kind.is_preemptible() {
            self.procs[running].ticks_left = self.procs[running].ticks_left.saturating_sub(1);
        }
        if !kind.is_billable() {
            let bill = self.bill;
            self.procs[bill].sys_time += 1;
            if self.procs[bill].kind.is_preemptible() && bill != running {
                self.procs[bill].ticks_left = self.procs[bill].ticks_left.saturating_sub(1);
            }
        }

        if kind.is_preemptible() && self.procs[running].ticks_left == 0 {
            let p = &mut self.procs[running];
            p.ticks_left = p.quantum;
            log::debug!("quantum of {:?} expired", self.endpoint(running));
            if self.procs[running].is_ready() {
                self.requeue_at_tail(running);
            }
            report.quantum_expired = true;
        }

        let clock = task_slot(CLOCK);
        for slot in 0..NR_TOTAL {
            match self.procs[slot].alarm {
                Some(deadline) if self.procs[slot].in_use && deadline <= self.realtime => {}
                _ => continue,
            }
            self.procs[slot].alarm = None;

            let msg = Message::notification(
                self.endpoint(clock),
                SYN_ALARM,
                0,
                self.realtime as i64,
            );
            match self.mini_notify(port, clock, slot, &msg) {
                Ok(()) => report.alarms_fired += 1,
                Err(e) => {
                    log::warn!("alarm of {:?} lost: {e:?}", self.endpoint(slot));
                    report.alarms_dropped += 1;
                }
            }
        }

        report
    }

    /// Arm (or with `ticks == 0`, cancel) the alarm of `slot`. Returns the
    /// number of ticks that were left on the previous alarm.
    pub(crate) fn set_alarm(&mut self, slot: usize, ticks: u64) -> u64 {
        let realtime = self.realtime;
        let p = &mut self.procs[slot];
        let previous = p
            .alarm
            .map_or(0, |deadline| deadline.saturating_sub(realtime));
        p.alarm = if ticks == 0 {
            None
        } else {
            Some(realtime.saturating_add(ticks))
        };
        previous
    }
}
