//! The IPC primitives: rendezvous send and receive, and asynchronous
//! notifications.
//!
//! These operate on slots that the caller has already validated and run with
//! CPU Lock held. They never suspend the kernel: "blocking" a process means
//! changing its [`IpcState`], which takes it off the ready queues.
use crate::{
    cfg::NR_TOTAL,
    endpoint::proc_nr_of,
    error::{NotifyError, ReceiveError, SendError},
    message::Message,
    notify::NotifyRecord,
    proc::{IpcState, Source},
    state::State,
    syscall::IpcFlags,
    utils::PrioBitmap,
    Port, VirAddr,
};

impl State {
    /// Read the message at `buf` in the address space of `slot`, stamped with
    /// the endpoint of `slot`.
    fn read_stamped(&self, port: &impl Port, slot: usize, buf: VirAddr) -> Message {
        let mut msg = port.read_message(proc_nr_of(slot), buf);
        msg.m_source = self.endpoint(slot);
        msg
    }

    /// Get a flag indicating whether `caller` sending to `dst` would close a
    /// cycle of processes blocked sending to one another.
    fn would_deadlock(&self, caller: usize, dst: usize) -> bool {
        let mut cur = dst;
        for _ in 0..NR_TOTAL {
            if cur == caller {
                return true;
            }
            match self.procs[cur].ipc.send_target() {
                Some(to) => cur = to,
                None => return false,
            }
        }
        false
    }

    /// Send the message at `buf` from `caller` to `dst`.
    ///
    /// If `dst` is waiting for a message from `caller`, the message is copied
    /// right away. Otherwise `caller` is blocked and appended to the senders
    /// of `dst`, unless `NON_BLOCKING` is given.
    pub(crate) fn mini_send(
        &mut self,
        port: &impl Port,
        caller: usize,
        dst: usize,
        buf: VirAddr,
        flags: IpcFlags,
    ) -> Result<(), SendError> {
        if self.procs[caller].ipc != IpcState::Runnable {
            return Err(SendError::BadContext);
        }

        if self.would_deadlock(caller, dst) {
            log::trace!(
                "send {:?} -> {:?} would deadlock",
                self.endpoint(caller),
                self.endpoint(dst)
            );
            return Err(SendError::Locked);
        }

        match self.procs[dst].ipc {
            IpcState::Receiving { from, buf: dst_buf } if from.accepts(caller) => {
                let msg = self.read_stamped(port, caller, buf);
                log::trace!("rendezvous {msg:?} -> {:?}", self.endpoint(dst));
                port.write_message(proc_nr_of(dst), dst_buf, &msg);
                self.set_ipc(dst, IpcState::Runnable);
                Ok(())
            }
            _ if flags.contains(IpcFlags::NON_BLOCKING) => Err(SendError::NotReady),
            _ => {
                log::trace!(
                    "{:?} blocks sending to {:?}",
                    self.endpoint(caller),
                    self.endpoint(dst)
                );
                self.set_ipc(caller, IpcState::Sending { to: dst, buf });
                self.push_sender(dst, caller);
                Ok(())
            }
        }
    }

    /// Receive a message from `src` into `buf` of `caller`.
    ///
    /// Blocked senders are served first in arrival order, then pending
    /// notifications (unless `FRESH_ANSWER` is given). If nothing matches,
    /// `caller` is blocked, unless `NON_BLOCKING` is given.
    ///
    /// A caller whose send is still pending (`SENDREC`) skips both scans and
    /// blocks for the reply straight away.
    pub(crate) fn mini_receive(
        &mut self,
        port: &impl Port,
        caller: usize,
        src: Source,
        buf: VirAddr,
        flags: IpcFlags,
    ) -> Result<(), ReceiveError> {
        match self.procs[caller].ipc {
            IpcState::Runnable => {}
            IpcState::Sending { to, .. } => {
                if flags.contains(IpcFlags::NON_BLOCKING) {
                    return Err(ReceiveError::NotReady);
                }
                self.set_ipc(
                    caller,
                    IpcState::SendThenReceive {
                        to,
                        from: src,
                        buf,
                    },
                );
                return Ok(());
            }
            _ => return Err(ReceiveError::BadContext),
        }

        // Blocked senders, oldest first
        let sender = self.iter_senders(caller).find(|&s| src.accepts(s));
        if let Some(sender) = sender {
            if let Some(sender_buf) = self.procs[sender].ipc.buf() {
                let msg = self.read_stamped(port, sender, sender_buf);
                log::trace!("{:?} takes {msg:?}", self.endpoint(caller));
                port.write_message(proc_nr_of(caller), buf, &msg);
            }
            self.unlink_sender(caller, sender);
            let ipc = self.procs[sender].ipc.send_completed();
            self.set_ipc(sender, ipc);
            return Ok(());
        }

        // Pending notifications
        if !flags.contains(IpcFlags::FRESH_ANSWER) {
            if let Some((prev, i)) = self.find_notification(caller, src) {
                let record = *self.ntf.get(i);
                let msg = Message::notification(
                    self.endpoint(record.source),
                    record.ntf_type,
                    record.flags,
                    record.arg,
                );
                log::trace!("{:?} takes notification {msg:?}", self.endpoint(caller));
                port.write_message(proc_nr_of(caller), buf, &msg);

                self.ntf.unlink(&mut self.procs[caller].ntf_q, prev, i);
                self.ntf.free(i);
                let more_from_source = self
                    .ntf
                    .iter_queue(self.procs[caller].ntf_q)
                    .any(|j| self.ntf.get(j).source == record.source);
                if !more_from_source {
                    self.procs[caller].ntf_pending.clear(record.source);
                }
                return Ok(());
            }
        }

        if flags.contains(IpcFlags::NON_BLOCKING) {
            return Err(ReceiveError::NotReady);
        }

        log::trace!("{:?} blocks receiving from {src:?}", self.endpoint(caller));
        self.set_ipc(caller, IpcState::Receiving { from: src, buf });
        Ok(())
    }

    /// Find the first pending notification at `dst` that `src` accepts.
    /// Returns the record and its predecessor in the queue.
    fn find_notification(&self, dst: usize, src: Source) -> Option<(Option<usize>, usize)> {
        if let Source::Slot(s) = src {
            if !self.procs[dst].ntf_pending.get(s) {
                return None;
            }
        }

        let mut prev = None;
        for i in self.ntf.iter_queue(self.procs[dst].ntf_q) {
            if src.accepts(self.ntf.get(i).source) {
                return Some((prev, i));
            }
            prev = Some(i);
        }
        None
    }

    /// Notify `dst` on behalf of `caller`. Only the type, the flags, and the
    /// argument of `msg` are conveyed.
    ///
    /// A waiting `dst` gets the notification right away. Otherwise it's queued
    /// at `dst`, replacing an earlier one from the same source with the same
    /// type.
    pub(crate) fn mini_notify(
        &mut self,
        port: &impl Port,
        caller: usize,
        dst: usize,
        msg: &Message,
    ) -> Result<(), NotifyError> {
        let (ntf_type, flags, arg) = (msg.m_type, msg.notify_flags(), msg.notify_arg());

        if let IpcState::Receiving { from, buf } = self.procs[dst].ipc {
            if from.accepts(caller) {
                let msg = Message::notification(self.endpoint(caller), ntf_type, flags, arg);
                log::trace!("notification {msg:?} -> waiting {:?}", self.endpoint(dst));
                port.write_message(proc_nr_of(dst), buf, &msg);
                self.set_ipc(dst, IpcState::Runnable);
                return Ok(());
            }
        }

        if self.procs[dst].ntf_pending.get(caller) {
            let existing = self.ntf.iter_queue(self.procs[dst].ntf_q).find(|&i| {
                let record = self.ntf.get(i);
                record.source == caller && record.ntf_type == ntf_type
            });
            if let Some(i) = existing {
                log::trace!(
                    "coalescing notification {ntf_type:#x} {:?} -> {:?}",
                    self.endpoint(caller),
                    self.endpoint(dst)
                );
                let record = self.ntf.get_mut(i);
                record.flags = flags;
                record.arg = arg;
                return Ok(());
            }
        }

        let record = NotifyRecord {
            source: caller,
            ntf_type,
            flags,
            arg,
            next: None,
        };
        let i = match self.ntf.alloc(record) {
            Some(i) => i,
            None => {
                log::warn!(
                    "notification pool exhausted; dropping {ntf_type:#x} {:?} -> {:?}",
                    self.endpoint(caller),
                    self.endpoint(dst)
                );
                return Err(NotifyError::NoSpace);
            }
        };
        log::trace!(
            "queueing notification {ntf_type:#x} {:?} -> {:?}",
            self.endpoint(caller),
            self.endpoint(dst)
        );
        self.ntf.push_back(&mut self.procs[dst].ntf_q, i);
        self.procs[dst].ntf_pending.set(caller);
        Ok(())
    }
}
