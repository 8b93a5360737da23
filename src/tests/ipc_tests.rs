// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! IPC Integration Tests
//!
//! Two processes talking through a service: one registers "svc/if" and
//! accepts, the other connects, then both exchange messages through the
//! endpoint syscalls.

use super::{kernel, wait_for, User};
use crate::error::Status;
use crate::ipc::MessageInterface;
use crate::kernel::Kernel;
use crate::object::KernelObject;
use crate::syscall::{err_to_ret, number, SyscallRet};

/// Scratch offsets used by every test
const NAME: u64 = 0;
const DATA: u64 = 0x100;
const OUT_ID: u64 = 0x200;
const OUT_SIZE: u64 = 0x208;
const OUT_DATA: u64 = 0x300;
const CALL_INFO: u64 = 0x210;
const HANDLES: u64 = 0x220;

/// Register "svc/if" from `server`, returning (service, interface) handles
fn listen(k: &Kernel, server: &User, max_size: u64) -> (u64, u64) {
    let name = server.poke_str(NAME, "svc");
    let svc = server.call(k, number::CREATE_SERVICE, &[name]);
    assert!(svc > 0);
    let name = server.poke_str(NAME, "if");
    let iface = server.call(k, number::CREATE_INTERFACE, &[svc as u64, name, max_size]);
    assert!(iface > 0);
    (svc as u64, iface as u64)
}

/// Connect `client` to "svc/if" and accept it on `server`
///
/// Returns (server endpoint, client endpoint).
fn connect(k: &Kernel, server: &User, client: &User, iface: u64) -> (u64, u64) {
    let path = client.poke_str(NAME, "svc/if");
    std::thread::scope(|s| {
        let connector = s.spawn(|| client.call(k, number::INTERFACE_CONNECT, &[path]));
        let accepted = loop {
            match server.call(k, number::INTERFACE_ACCEPT, &[iface]) {
                0 => std::thread::yield_now(),
                handle => break handle,
            }
        };
        let connected = connector.join().unwrap();
        assert!(accepted > 0 && connected > 0);
        (accepted as u64, connected as u64)
    })
}

fn queue(k: &Kernel, user: &User, ep: u64, id: u64, payload: &[u8]) -> SyscallRet {
    let data = user.poke(DATA, payload);
    user.call(k, number::ENDPOINT_QUEUE, &[ep, id, payload.len() as u64, data])
}

/// Dequeue into scratch, returning (id, payload) if a message was there
fn dequeue(k: &Kernel, user: &User, ep: u64) -> Option<(u64, Vec<u8>)> {
    let ret = user.call(
        k,
        number::ENDPOINT_DEQUEUE,
        &[ep, user.at(OUT_ID), user.at(OUT_SIZE), user.at(OUT_DATA)],
    );
    assert!(ret >= 0, "dequeue failed: {}", ret);
    if ret == 0 {
        return None;
    }
    let mut size = [0u8; 2];
    size.copy_from_slice(&user.peek(OUT_SIZE, 2));
    let size = u16::from_le_bytes(size) as usize;
    Some((user.peek_u64(OUT_ID), user.peek(OUT_DATA, size)))
}

/// Issue endpoint_call from `user` with the request already at DATA
fn call(k: &Kernel, user: &User, ep: u64, id: u64, size: u64, expected: u64, timeout_us: i64) -> SyscallRet {
    user.poke_u64(CALL_INFO, size);
    user.poke_u64(CALL_INFO + 8, timeout_us as u64);
    user.call(
        k,
        number::ENDPOINT_CALL,
        &[ep, id, user.at(DATA), expected, user.at(OUT_DATA), user.at(CALL_INFO)],
    )
}

/// The end-to-end scenario: connect, accept, queue, dequeue, then the
/// server closes and the client's call reports the closed connection
#[test]
fn test_service_round_trip() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");

    let (_svc, iface) = listen(&k, &a, 64);
    let (ep_a, ep_b) = connect(&k, &a, &b, iface);

    let payload = *b"0123456789";
    assert_eq!(queue(&k, &b, ep_b, 1, &payload), 0);
    assert_eq!(dequeue(&k, &a, ep_a), Some((1, payload.to_vec())));
    assert_eq!(dequeue(&k, &a, ep_a), None);

    assert_eq!(a.call(&k, number::OBJECT_DESTROY, &[ep_a]), 0);
    b.poke(DATA, b"ping");
    assert_eq!(call(&k, &b, ep_b, 2, 4, 3, 0), err_to_ret(Status::NotConnected));
}

#[test]
fn test_peer_close_wakes_blocked_call() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 64);
    let (ep_a, ep_b) = connect(&k, &a, &b, iface);

    b.poke(DATA, b"ping");
    std::thread::scope(|s| {
        let caller = s.spawn(|| call(&k, &b, ep_b, 2, 4, 3, 0));
        wait_for(|| a.process.handles().get(ep_a).map_or(false, |ep| ep.is_signaled()));
        assert_eq!(a.call(&k, number::OBJECT_DESTROY, &[ep_a]), 0);
        assert_eq!(caller.join().unwrap(), err_to_ret(Status::NotConnected));
    });
}

#[test]
fn test_call_gets_matching_reply() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 64);
    let (ep_a, ep_b) = connect(&k, &a, &b, iface);

    b.poke(DATA, b"question");
    std::thread::scope(|s| {
        let caller = s.spawn(|| call(&k, &b, ep_b, 5, 8, 6, 0));

        let request = loop {
            if let Some(message) = dequeue(&k, &a, ep_a) {
                break message;
            }
            std::thread::yield_now();
        };
        assert_eq!(request, (5, b"question".to_vec()));
        // An unrelated message does not satisfy the call
        assert_eq!(queue(&k, &a, ep_a, 99, b"noise"), 0);
        assert_eq!(queue(&k, &a, ep_a, 6, b"answer!"), 0);

        assert_eq!(caller.join().unwrap(), 0);
    });
    assert_eq!(b.peek(OUT_DATA, 7), b"answer!");
    assert_eq!(b.peek_u64(CALL_INFO), 7);
    assert_eq!(dequeue(&k, &b, ep_b), Some((99, b"noise".to_vec())));
}

#[test]
fn test_call_timeout() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 64);
    let (_ep_a, ep_b) = connect(&k, &a, &b, iface);

    b.poke(DATA, b"hi");
    assert_eq!(call(&k, &b, ep_b, 1, 2, 2, 2_000), err_to_ret(Status::TimedOut));
    assert_eq!(call(&k, &b, ep_b, 1, 65, 2, 2_000), err_to_ret(Status::MessageTooLarge));
}

#[test]
fn test_accept_without_pending_returns_zero() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let (_svc, iface) = listen(&k, &a, 64);
    assert_eq!(a.call(&k, number::INTERFACE_ACCEPT, &[iface]), 0);
}

#[test]
fn test_fifo_order_and_size_limit() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 16);
    let (ep_a, ep_b) = connect(&k, &a, &b, iface);

    assert_eq!(queue(&k, &b, ep_b, 1, b"m1"), 0);
    assert_eq!(queue(&k, &b, ep_b, 2, b"m2"), 0);
    assert_eq!(queue(&k, &b, ep_b, 3, &[7u8; 17]), err_to_ret(Status::MessageTooLarge));
    assert_eq!(queue(&k, &b, ep_b, 4, b"m3"), 0);

    let ids: Vec<u64> = core::iter::from_fn(|| dequeue(&k, &a, ep_a).map(|(id, _)| id)).collect();
    assert_eq!(ids, [1, 2, 4]);

    let info = a.at(0x400);
    assert_eq!(a.call(&k, number::ENDPOINT_INFO, &[ep_a, info]), 0);
    assert_eq!(a.peek_u64(0x400), 16);
}

#[test]
fn test_namespace_errors() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (svc, _iface) = listen(&k, &a, 64);

    let name = b.poke_str(NAME, "svc");
    assert_eq!(b.call(&k, number::CREATE_SERVICE, &[name]), err_to_ret(Status::Exists));
    let name = a.poke_str(NAME, "if");
    assert_eq!(
        a.call(&k, number::CREATE_INTERFACE, &[svc, name, 64]),
        err_to_ret(Status::Exists)
    );
    assert_eq!(
        a.call(&k, number::CREATE_INTERFACE, &[svc, a.poke_str(NAME, "big"), 1 << 16]),
        err_to_ret(Status::InvalidArgument)
    );

    let path = b.poke_str(NAME, "svc/none");
    assert_eq!(b.call(&k, number::INTERFACE_CONNECT, &[path]), err_to_ret(Status::NoSuchEntry));
    let path = b.poke_str(NAME, "svc");
    assert_eq!(
        b.call(&k, number::INTERFACE_CONNECT, &[path]),
        err_to_ret(Status::InvalidArgument)
    );
}

/// Tearing down the interface releases a client stuck in connect
#[test]
fn test_interface_destroy_wakes_connector() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 64);
    let interface = a.process.handles().get_typed::<MessageInterface>(iface).unwrap();

    let path = b.poke_str(NAME, "svc/if");
    std::thread::scope(|s| {
        let connector = s.spawn(|| b.call(&k, number::INTERFACE_CONNECT, &[path]));
        wait_for(|| interface.pending_count() == 1);
        assert_eq!(a.call(&k, number::OBJECT_DESTROY, &[iface]), 0);
        assert_eq!(connector.join().unwrap(), err_to_ret(Status::NotConnected));
    });
    assert_eq!(interface.pending_count(), 0);
    assert_eq!(b.process.handles().count(), 0);
}

/// kernel_object_wait reports which endpoint has traffic
#[test]
fn test_object_wait_on_endpoints() {
    let k = kernel();
    let a = User::spawn(&k, "/bin/server");
    let b = User::spawn(&k, "/bin/client");
    let (_svc, iface) = listen(&k, &a, 64);
    let (ep_a1, ep_b1) = connect(&k, &a, &b, iface);
    let (ep_a2, ep_b2) = connect(&k, &a, &b, iface);
    a.poke_u64(HANDLES, ep_a1);
    a.poke_u64(HANDLES + 8, ep_a2);

    std::thread::scope(|s| {
        let waiter = s.spawn(|| a.call(&k, number::OBJECT_WAIT, &[a.at(HANDLES), 2, 0]));
        wait_for(|| a.thread.state() == crate::sched::ThreadState::Blocked);
        assert_eq!(queue(&k, &b, ep_b2, 1, b"x"), 0);
        assert_eq!(waiter.join().unwrap(), 1);
    });

    assert_eq!(queue(&k, &b, ep_b1, 1, b"y"), 0);
    assert_eq!(a.call(&k, number::OBJECT_WAIT_ONE, &[ep_a1, 1_000]), 0);
    assert_eq!(a.call(&k, number::OBJECT_WAIT, &[a.at(HANDLES), 0, 0]), err_to_ret(Status::InvalidArgument));
    a.poke_u64(HANDLES, 77);
    assert_eq!(a.call(&k, number::OBJECT_WAIT, &[a.at(HANDLES), 1, 0]), err_to_ret(Status::BadHandle));
}
