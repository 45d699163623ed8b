//! Ready queues, preemption, quantum accounting, and alarms.
use nucleus_kernel::{
    cfg::{NR_NOTIFY_BUFS, NR_SCHED_QUEUES, PROC_QUANTUM, SERVER_Q, USER_Q},
    message::SYN_ALARM,
    syscall::{NOTIFY, RECEIVE, SEND},
    Endpoint, ExecContext, IpcStatus, Message, ProcKind, ReadyError, ResultCode, RtsFlags,
    SchedError, CLOCK, HARDWARE, IDLE,
};
use nucleus_port_std::{boot, StdKernel};
use quickcheck_macros::quickcheck;

mod common;
use common::{attr, buf, spawn_ready, spawn_user};

const PROCESS: ExecContext = ExecContext::Process;

/// Check the relationship between the ready queues and the process table.
fn check_partition(kernel: &StdKernel) {
    kernel.check_runqueues().unwrap();
    let table = kernel.proc_table().unwrap();

    for p in &table.procs {
        let occurrences = table
            .ready_queues
            .iter()
            .flatten()
            .filter(|&&ep| ep == p.endpoint)
            .count();
        assert_eq!(occurrences, p.is_ready as usize, "{p:?}");
        assert_eq!(
            p.is_ready,
            p.ipc == IpcStatus::Runnable && p.rts.is_empty(),
            "{p:?}"
        );
        if p.is_ready {
            assert!(table.ready_queues[p.priority].contains(&p.endpoint));
        }
    }

    // The process to run next is ready and in the most urgent non-empty queue
    let most_urgent = table.ready_queues.iter().position(|q| !q.is_empty());
    let next = table.get(table.next).unwrap();
    assert!(next.is_ready);
    assert_eq!(Some(next.priority), most_urgent);
}

#[test]
fn boot_state() {
    let kernel = boot();
    let idle = Endpoint::new(0, IDLE);
    assert_eq!(kernel.running(), Ok(idle));
    assert_eq!(kernel.next_to_run(), Ok(idle));
    assert_eq!(kernel.uptime(), Ok(0));

    let table = kernel.proc_table().unwrap();
    assert_eq!(table.ready_queues[NR_SCHED_QUEUES - 1].as_slice(), [idle]);
    assert_eq!(table.bill, idle);
    let names: Vec<_> = table.procs.iter().map(|p| p.name).collect();
    assert_eq!(names, ["idle", "clock", "system", "kernel"]);
    check_partition(&kernel);
}

#[test]
fn spawned_processes_wait_for_their_map() {
    let kernel = boot();
    let ep = kernel.spawn(0, &attr("user", ProcKind::User)).unwrap();
    let info = kernel.proc_table().unwrap().get(ep).cloned().unwrap();
    assert_eq!(info.rts, RtsFlags::NO_MAP);
    assert!(!info.is_ready);
    assert_eq!(info.priority, USER_Q);

    kernel.lock_ready(ep, RtsFlags::NO_MAP).unwrap();
    assert_eq!(kernel.next_to_run(), Ok(ep));
    check_partition(&kernel);
}

#[test]
fn more_urgent_process_preempts() {
    let kernel = boot();
    let user = spawn_user(&kernel, 0);
    assert_eq!(kernel.dispatch(), Ok(user));

    let server = spawn_ready(&kernel, 1, attr("srv", ProcKind::Server));
    assert_eq!(kernel.running(), Ok(user));
    assert_eq!(kernel.next_to_run(), Ok(server));
    // Only user processes are billed
    assert_eq!(kernel.proc_table().unwrap().bill, user);

    // A second user process of the same priority doesn't preempt
    let user2 = spawn_user(&kernel, 2);
    assert_eq!(kernel.next_to_run(), Ok(server));
    assert_eq!(kernel.dispatch(), Ok(server));

    kernel.lock_unready(server, RtsFlags::P_STOP).unwrap();
    assert_eq!(kernel.next_to_run(), Ok(user2));
    assert_eq!(
        kernel.proc_table().unwrap().ready_queues[USER_Q].as_slice(),
        [user2, user]
    );
    check_partition(&kernel);

    kernel.lock_ready(server, RtsFlags::P_STOP).unwrap();
    assert_eq!(kernel.next_to_run(), Ok(server));
    check_partition(&kernel);
}

#[test]
fn blocking_the_next_process_picks_another() {
    let kernel = boot();
    let q = spawn_user(&kernel, 0);
    assert_eq!(kernel.dispatch(), Ok(q));

    assert_eq!(kernel.sys_call(q, RECEIVE, Endpoint::ANY, buf(0)), ResultCode::Success);
    assert_eq!(kernel.next_to_run(), Ok(Endpoint::new(0, IDLE)));
    check_partition(&kernel);

    let p = spawn_user(&kernel, 1);
    assert_eq!(kernel.next_to_run(), Ok(p));
    assert_eq!(kernel.sys_call(p, SEND, q, buf(0)), ResultCode::Success);
    // `q` is back at the head of the user queue but `p` stays next
    assert_eq!(
        kernel.proc_table().unwrap().ready_queues[USER_Q].as_slice(),
        [q, p]
    );
    assert_eq!(kernel.next_to_run(), Ok(p));
    check_partition(&kernel);
}

#[test]
fn protected_processes() {
    let kernel = boot();
    assert_eq!(
        kernel.lock_unready(Endpoint::new(0, IDLE), RtsFlags::P_STOP),
        Err(ReadyError::BadParam)
    );
    assert_eq!(
        kernel.lock_ready(Endpoint::new(0, HARDWARE), RtsFlags::NO_MAP),
        Err(ReadyError::BadParam)
    );
    assert_eq!(
        kernel.lock_ready(Endpoint::new(3, 5), RtsFlags::NO_MAP),
        Err(ReadyError::DeadSrcDst)
    );
    assert_eq!(
        kernel.exit(Endpoint::new(0, CLOCK)),
        Err(nucleus_kernel::ExitError::BadParam)
    );
    check_partition(&kernel);
}

#[test]
fn sched_rotates_a_queue() {
    let kernel = boot();
    let s1 = spawn_ready(&kernel, 0, attr("s1", ProcKind::Server));
    let s2 = spawn_ready(&kernel, 1, attr("s2", ProcKind::Server));
    assert_eq!(kernel.next_to_run(), Ok(s1));

    kernel.lock_sched(SERVER_Q).unwrap();
    assert_eq!(
        kernel.proc_table().unwrap().ready_queues[SERVER_Q].as_slice(),
        [s2, s1]
    );
    assert_eq!(kernel.next_to_run(), Ok(s2));

    // Rotating an empty queue only re-picks
    kernel.lock_sched(USER_Q).unwrap();
    assert_eq!(kernel.next_to_run(), Ok(s2));

    assert_eq!(kernel.lock_sched(NR_SCHED_QUEUES), Err(SchedError::BadParam));
    check_partition(&kernel);
}

#[test]
fn quantum_expiry_rotates_the_running_process() {
    let kernel = boot();
    let s1 = spawn_ready(&kernel, 0, attr("s1", ProcKind::Server));
    let s2 = spawn_ready(&kernel, 1, attr("s2", ProcKind::Server));
    assert_eq!(kernel.dispatch(), Ok(s1));

    for i in 1..PROC_QUANTUM {
        let report = kernel.clock_tick(PROCESS).unwrap();
        assert_eq!(report.realtime, i as u64);
        assert!(!report.quantum_expired);
    }
    let report = kernel.clock_tick(PROCESS).unwrap();
    assert!(report.quantum_expired);
    assert_eq!(kernel.next_to_run(), Ok(s2));

    let table = kernel.proc_table().unwrap();
    let s1_info = table.get(s1).unwrap();
    assert_eq!(s1_info.ticks_left, PROC_QUANTUM);
    assert_eq!(s1_info.user_time, PROC_QUANTUM as u64);
    assert_eq!(table.ready_queues[SERVER_Q].as_slice(), [s2, s1]);

    // Servers are not billed; the idle process takes their system time
    assert_eq!(table.get(Endpoint::new(0, IDLE)).unwrap().sys_time, PROC_QUANTUM as u64);
    check_partition(&kernel);
}

#[test]
fn user_processes_take_turns_by_quantum() {
    let kernel = boot();
    let a = spawn_user(&kernel, 0);
    assert_eq!(kernel.dispatch(), Ok(a));
    // Readied at the head of the queue, but not more urgent than `a`
    let b = spawn_user(&kernel, 1);
    assert_eq!(kernel.proc_table().unwrap().ready_queues[USER_Q].as_slice(), [b, a]);
    assert_eq!(kernel.next_to_run(), Ok(a));

    for (i, owner) in [a, b, a, b].into_iter().enumerate() {
        for _ in 0..PROC_QUANTUM {
            assert_eq!(kernel.running(), Ok(owner));
            kernel.clock_tick(PROCESS).unwrap();
            kernel.dispatch().unwrap();
        }
        let other = if owner == a { b } else { a };
        assert_eq!(kernel.running(), Ok(other), "after quantum {i}");
        let table = kernel.proc_table().unwrap();
        assert_eq!(table.ready_queues[USER_Q].as_slice(), [other, owner]);
        assert_eq!(table.bill, other);
        check_partition(&kernel);
    }

    let table = kernel.proc_table().unwrap();
    for ep in [a, b] {
        assert_eq!(table.get(ep).unwrap().user_time, 2 * PROC_QUANTUM as u64);
    }
}

#[test]
fn alarms() {
    let kernel = boot();
    let port = kernel.port();
    let clock = Endpoint::new(0, CLOCK);
    let p = spawn_user(&kernel, 0);
    let q = spawn_user(&kernel, 1);

    assert_eq!(kernel.set_alarm(p, 3), Ok(0));
    assert_eq!(kernel.set_alarm(q, 2), Ok(0));
    assert_eq!(kernel.sys_call(q, RECEIVE, Endpoint::ANY, buf(0)), ResultCode::Success);

    // `q` is waiting, so its alarm is delivered immediately
    assert_eq!(kernel.clock_tick(PROCESS).unwrap().alarms_fired, 0);
    assert_eq!(kernel.clock_tick(PROCESS).unwrap().alarms_fired, 1);
    let msg = port.read_user(1, buf(0));
    assert_eq!((msg.m_source, msg.m_type, msg.notify_arg()), (clock, SYN_ALARM, 2));
    assert!(kernel.proc_table().unwrap().get(q).unwrap().is_ready);

    // `p` isn't, so it's queued
    assert_eq!(kernel.clock_tick(PROCESS).unwrap().alarms_fired, 1);
    let table = kernel.proc_table().unwrap();
    let p_info = table.get(p).unwrap();
    assert_eq!(p_info.alarm, None);
    assert_eq!(p_info.notifications.len(), 1);
    assert_eq!(p_info.notifications[0].source, clock);
    assert_eq!(p_info.notifications[0].arg, 3);

    assert_eq!(kernel.sys_call(p, RECEIVE, Endpoint::ANY, buf(0)), ResultCode::Success);
    assert_eq!(port.read_user(0, buf(0)).m_type, SYN_ALARM);

    // Rearming reports the ticks that were left
    assert_eq!(kernel.set_alarm(p, 10), Ok(0));
    kernel.clock_tick(ExecContext::Interrupt { depth: 1 }).unwrap();
    assert_eq!(kernel.set_alarm(p, 0), Ok(9));
    assert_eq!(kernel.uptime(), Ok(4));
    check_partition(&kernel);
}

#[test]
fn alarm_is_dropped_when_the_pool_is_exhausted() {
    let kernel = boot();
    let p = spawn_user(&kernel, 0);
    let q = spawn_user(&kernel, 1);

    for ty in 0..NR_NOTIFY_BUFS as i32 {
        kernel.port().write_user(0, buf(0), &Message::new(ty));
        assert_eq!(kernel.sys_call(p, NOTIFY, q, buf(0)), ResultCode::Success);
    }
    kernel.set_alarm(q, 1).unwrap();
    let report = kernel.clock_tick(PROCESS).unwrap();
    assert_eq!((report.alarms_fired, report.alarms_dropped), (0, 1));
    assert_eq!(kernel.proc_table().unwrap().get(q).unwrap().alarm, None);
}

#[derive(Debug)]
enum Cmd {
    Spawn(usize),
    Exit(usize),
    Stop(usize),
    Resume(usize),
    Send(usize, usize),
    Receive(usize),
    Notify(usize, usize),
    Tick,
}

/// Map random bytes to kernel operations on four process slots.
fn interpret(bytecode: &[u8]) -> impl Iterator<Item = Cmd> + '_ {
    bytecode.chunks_exact(3).map(|instr| {
        let (i, j) = (instr[1] as usize % 4, instr[2] as usize % 4);
        match instr[0] % 8 {
            0 => Cmd::Spawn(i),
            1 => Cmd::Exit(i),
            2 => Cmd::Stop(i),
            3 => Cmd::Resume(i),
            4 => Cmd::Send(i, j),
            5 => Cmd::Receive(i),
            6 => Cmd::Notify(i, j),
            _ => Cmd::Tick,
        }
    })
}

#[quickcheck]
fn ready_queues_track_readiness(bytecode: Vec<u8>) {
    const KINDS: [ProcKind; 4] = [
        ProcKind::User,
        ProcKind::User,
        ProcKind::Server,
        ProcKind::Driver,
    ];

    let kernel = boot();
    let mut eps: [Option<Endpoint>; 4] = [None; 4];

    for cmd in interpret(&bytecode) {
        log::trace!("{cmd:?}");
        match cmd {
            Cmd::Spawn(i) => {
                if eps[i].is_none() {
                    eps[i] = Some(spawn_ready(&kernel, i as i32, attr("p", KINDS[i])));
                }
            }
            Cmd::Exit(i) => {
                if let Some(ep) = eps[i].take() {
                    kernel.exit(ep).unwrap();
                }
            }
            Cmd::Stop(i) => {
                if let Some(ep) = eps[i] {
                    kernel.lock_unready(ep, RtsFlags::P_STOP).unwrap();
                }
            }
            Cmd::Resume(i) => {
                if let Some(ep) = eps[i] {
                    kernel.lock_ready(ep, RtsFlags::P_STOP).unwrap();
                }
            }
            Cmd::Send(i, j) => {
                if let (Some(a), Some(b)) = (eps[i], eps[j]) {
                    kernel.sys_call(a, SEND, b, buf(0));
                }
            }
            Cmd::Receive(i) => {
                if let Some(ep) = eps[i] {
                    kernel.sys_call(ep, RECEIVE, Endpoint::ANY, buf(1));
                }
            }
            Cmd::Notify(i, j) => {
                if let (Some(a), Some(b)) = (eps[i], eps[j]) {
                    kernel.sys_call(a, NOTIFY, b, buf(2));
                }
            }
            Cmd::Tick => {
                kernel.clock_tick(PROCESS).unwrap();
                kernel.dispatch().unwrap();
            }
        }
        check_partition(&kernel);
    }

    // Tearing everything down returns every notification record
    for ep in eps.into_iter().flatten() {
        kernel.exit(ep).unwrap();
    }
    let table = kernel.proc_table().unwrap();
    assert_eq!(table.free_notify_bufs, NR_NOTIFY_BUFS);
    assert_eq!(table.procs.len(), 4);
    check_partition(&kernel);
}
