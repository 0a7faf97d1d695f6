mod common;

use std::sync::{Arc, Mutex};

use common::{befriend, linked, log, quiet, run, run_until};
use toxide_core::events::{FriendMessage, FriendName};
use toxide_core::{Connection, MessageKind, Network, Options, SendMessageError, Tox, UserStatus};

#[test]
fn request_accepted_from_handler() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let requests = log();
    let sink = requests.clone();
    toxes[1].on_friend_request(move |tox, e| {
        sink.lock().unwrap().push(e.message.clone());
        tox.friend_add_norequest(&e.public_key).unwrap();
    });
    let address = toxes[1].self_address()?;
    let friend = toxes[0].friend_add(&address, "Gentoo")?;
    run_until(&mut toxes, 50, |t| {
        t[0].friend_connection_status(friend).unwrap().is_connected()
            && t[1].friend_list().unwrap() == vec![0]
            && t[1].friend_connection_status(0).unwrap().is_connected()
    });
    assert_eq!(*requests.lock().unwrap(), vec!["Gentoo".to_string()]);
    assert_eq!(toxes[1].friend_public_key(0)?, toxes[0].self_public_key()?);
    Ok(())
}

#[test]
fn wrong_nospam_is_ignored() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let requests = log::<String>();
    let sink = requests.clone();
    toxes[1].on_friend_request(move |_, e| sink.lock().unwrap().push(e.message.clone()));
    let address = toxes[1].self_address()?;
    toxes[1].self_set_nospam(address.nospam().wrapping_add(1))?;
    toxes[0].friend_add(&address, "hello?")?;
    run(&mut toxes, 20);
    assert!(requests.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn name_change_propagates() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (_, a_at_b) = befriend(&mut toxes, 0, 1)?;
    let names = log();
    let sink = names.clone();
    toxes[1].on_friend_name(move |tox, e: &FriendName| {
        assert_eq!(tox.friend_name(e.friend).unwrap(), e.name);
        sink.lock().unwrap().push(e.name.clone());
    });
    toxes[0].self_set_name("Gentoo")?;
    run_until(&mut toxes, 20, |_| !names.lock().unwrap().is_empty());
    assert_eq!(*names.lock().unwrap(), vec!["Gentoo".to_string()]);
    assert_eq!(toxes[1].friend_name(a_at_b)?, "Gentoo");
    assert_eq!(toxes[1].friend_name_size(a_at_b)?, 6);
    Ok(())
}

#[test]
fn status_and_status_message_propagate() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (_, a_at_b) = befriend(&mut toxes, 0, 1)?;
    let statuses = log();
    let sink = statuses.clone();
    toxes[1].on_friend_status(move |_, e| sink.lock().unwrap().push(e.status));
    toxes[0].self_set_status(UserStatus::Busy)?;
    toxes[0].self_set_status_message("compiling")?;
    run_until(&mut toxes, 20, |t| {
        t[1].friend_status_message(a_at_b).unwrap() == "compiling"
    });
    assert_eq!(*statuses.lock().unwrap(), vec![UserStatus::Busy]);
    assert_eq!(toxes[1].friend_status(a_at_b)?, UserStatus::Busy);
    Ok(())
}

#[test]
fn message_and_read_receipt() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (b_at_a, a_at_b) = befriend(&mut toxes, 0, 1)?;
    let messages = log();
    let sink = messages.clone();
    toxes[0].on_friend_message(move |_, e: &FriendMessage| {
        sink.lock().unwrap().push((e.friend, e.kind, e.text.clone()));
    });
    let receipts = log();
    let sink = receipts.clone();
    toxes[1].on_friend_read_receipt(move |_, e| sink.lock().unwrap().push(e.message_id));

    let id = toxes[1].friend_send_message(a_at_b, MessageKind::Normal, "hohoo")?;
    run_until(&mut toxes, 20, |_| !receipts.lock().unwrap().is_empty());
    assert_eq!(
        *messages.lock().unwrap(),
        vec![(b_at_a, MessageKind::Normal, "hohoo".to_string())]
    );
    assert_eq!(*receipts.lock().unwrap(), vec![id]);
    Ok(())
}

#[test]
fn delete_disconnects_peer() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (b_at_a, a_at_b) = befriend(&mut toxes, 0, 1)?;
    let changes = log();
    let sink = changes.clone();
    toxes[1].on_friend_connection_status(move |_, e| sink.lock().unwrap().push(e.connection));

    toxes[0].friend_delete(b_at_a)?;
    assert!(!toxes[0].friend_exists(b_at_a)?);
    assert!(toxes[0].friend_delete(b_at_a).is_err());
    run_until(&mut toxes, 20, |t| {
        t[1].friend_connection_status(a_at_b).unwrap() == Connection::None
    });
    run(&mut toxes, 5);
    assert_eq!(*changes.lock().unwrap(), vec![Connection::None]);
    assert_eq!(
        toxes[1].friend_send_message(a_at_b, MessageKind::Normal, "still there?"),
        Err(SendMessageError::FriendNotConnected)
    );
    Ok(())
}

#[test]
fn killed_peer_goes_offline() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (_, a_at_b) = befriend(&mut toxes, 0, 1)?;
    toxes[0].kill();
    run_until(&mut toxes, 10, |t: &[Tox]| {
        t[1].friend_connection_status(a_at_b).unwrap() == Connection::None
            && t[1].self_connection_status().unwrap() == Connection::None
    });
    Ok(())
}

#[test]
fn handler_may_iterate_without_losing_messages() -> anyhow::Result<()> {
    let (_net, mut toxes) = linked(2)?;
    let (b_at_a, _) = befriend(&mut toxes, 0, 1)?;
    let mut b = toxes.pop().expect("two instances");
    let a = Arc::new(Mutex::new(toxes.pop().expect("two instances")));

    let received = log();
    let (sink, sender) = (received.clone(), a.clone());
    b.on_friend_message(move |tox, e: &FriendMessage| {
        sink.lock().unwrap().push(e.text.clone());
        if e.text == "one" {
            sender
                .lock()
                .unwrap()
                .friend_send_message(b_at_a, MessageKind::Normal, "two")
                .unwrap();
            tox.iterate().unwrap();
        }
    });
    a.lock()
        .unwrap()
        .friend_send_message(b_at_a, MessageKind::Normal, "one")?;
    for _ in 0..20 {
        a.lock().unwrap().iterate()?;
        b.iterate()?;
        if received.lock().unwrap().len() == 2 {
            break;
        }
    }
    assert_eq!(*received.lock().unwrap(), vec!["one", "two"]);
    Ok(())
}

#[test]
fn info_sent_when_connection_upgrades() -> anyhow::Result<()> {
    let net = Network::new();
    let relay = Tox::with_network(
        Options {
            tcp_port: 33445,
            ..quiet()
        },
        &net,
    )?;
    let port = relay.self_udp_port()?.expect("udp enabled");
    let dht = relay.self_dht_id()?.to_string();
    let mut toxes = vec![relay, Tox::with_network(quiet(), &net)?, Tox::with_network(quiet(), &net)?];
    for tox in &mut toxes[1..] {
        tox.add_tcp_relay("127.0.0.1", 33445, &dht)?;
    }
    let (_, a_at_b) = befriend(&mut toxes, 1, 2)?;
    assert_eq!(toxes[2].friend_connection_status(a_at_b)?, Connection::Tcp);

    toxes[2].bootstrap("127.0.0.1", port, &dht)?;
    toxes[2].iterate()?;
    // The name change and the switch to UDP land in the same tick.
    toxes[1].self_set_name("upgraded")?;
    toxes[1].bootstrap("127.0.0.1", port, &dht)?;
    toxes[1].iterate()?;
    run_until(&mut toxes, 10, |t| t[2].friend_name(a_at_b).unwrap() == "upgraded");
    assert_eq!(toxes[2].friend_connection_status(a_at_b)?, Connection::Udp);
    Ok(())
}
