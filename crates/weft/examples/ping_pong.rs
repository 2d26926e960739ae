//! Two endpoints exchanging pings through one router, all in-process.
//!
//! Run:
//! - cargo run -p weft --example ping_pong
//! - cargo run -p weft --example ping_pong -- 10
//!   (exchanges 10 pings)

use std::env;

use weft::{
    idle_pause, special, Connection, DirectAcceptor, Identifier, Message, MessageId, Router,
    RouterConfig,
};

fn main() {
    let count: u64 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let mut router = Router::new(RouterConfig::default());
    let acceptor = DirectAcceptor::new();
    let connector = acceptor.connector();
    router.add_acceptor(Box::new(acceptor));

    let ping_id = MessageId::new(Identifier::new("example"), Identifier::new("ping"));
    let pong_id = MessageId::new(Identifier::new("example"), Identifier::new("pong"));

    // Attach two endpoints with self-assigned ids
    let mut alice = connector.connect().expect("router acceptor alive");
    let mut bob = connector.connect().expect("router acceptor alive");
    for (endpoint, id) in [(&mut alice, 100u64), (&mut bob, 200u64)] {
        let mut announcement = Message::new();
        announcement.set_source_id(id);
        endpoint.send(special::ANNOUNCE_ENDPOINT_ID, &announcement);
    }
    router.update(2);

    let mut sequence = 0;
    let mut received = 0;
    let mut idle_streak = 0;

    let mut ping = Message::new();
    ping.set_source_id(100).set_target_id(200).set_sequence_no(sequence);
    alice.send(ping_id, &ping);

    while received < count {
        let worked = router.update(2);

        // Bob answers every ping he sees
        let mut pings = Vec::new();
        bob.fetch_messages(&mut |msg_id, _age, message| {
            if msg_id == ping_id {
                pings.push(message.clone());
            }
            true
        });
        for request in pings {
            println!("[bob] ping seq={}", request.sequence_no);
            let mut pong = Message::new();
            pong.setup_response(&request);
            pong.set_source_id(200);
            bob.send(pong_id, &pong);
        }

        // Alice counts pongs and sends the next ping
        let mut got_pong = false;
        alice.fetch_messages(&mut |msg_id, _age, message| {
            if msg_id == pong_id {
                println!("[alice] pong seq={}", message.sequence_no);
                got_pong = true;
            }
            true
        });
        if got_pong {
            received += 1;
            if received < count {
                sequence += 1;
                let mut ping = Message::new();
                ping.set_source_id(100).set_target_id(200).set_sequence_no(sequence);
                alice.send(ping_id, &ping);
            }
        }

        if worked || got_pong {
            idle_streak = 0;
        } else {
            idle_streak += 1;
            idle_pause(idle_streak);
        }
    }

    println!(
        "exchanged {} pings; router forwarded {} messages, dropped {}",
        received,
        router.forwarded_messages(),
        router.dropped_messages()
    );
}
