//! Transport integration tests: full worker + facade against the mock
//! network. Timings use millisecond-scale configs so reconnect, heartbeat
//! and stale-link behaviour is observable within a test run.

use super::mock_link::{MockNetwork, wait_until};
use bootbone::link::envelope::HEARTBEAT_FRAME;
use bootbone::link::{Message, Transport, TransportState};
use bootbone::{Error, TransportConfig};
use std::time::{Duration, Instant};

const URI: &str = "ws://peer.test/ws";
const SETTLE: Duration = Duration::from_secs(2);

fn cfg(heartbeat_ms: u32, schedule: &[u32]) -> TransportConfig {
    let mut c = TransportConfig::default();
    c.heartbeat_interval_ms = heartbeat_ms;
    c.backoff_schedule_ms.clear();
    for &ms in schedule {
        c.backoff_schedule_ms.push(ms).unwrap();
    }
    c.poll_interval_ms = 5;
    c.shutdown_grace_ms = 200;
    c
}

/// Long heartbeat, short backoff: nothing time-driven interferes.
fn quiet() -> TransportConfig {
    cfg(10_000, &[10, 20, 40])
}

fn started(net: &MockNetwork, config: TransportConfig) -> Transport<MockNetwork> {
    let t = Transport::new(net.clone(), config).unwrap();
    t.start(URI).unwrap();
    t
}

// ── Data path ─────────────────────────────────────────────────

#[test]
fn three_messages_arrive_in_fifo_order_exactly_once() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));

    for text in ["a", "b", "c"] {
        t.send_text(text).unwrap();
    }
    assert!(wait_until(SETTLE, || net.data_frames().len() == 3));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(net.data_frames(), ["a", "b", "c"]);
    assert_eq!(t.outbound_depth(), 0);
    assert_eq!(t.stats().frames_sent, 3);
}

#[test]
fn messages_queued_while_disconnected_flush_on_connect() {
    let net = MockNetwork::new();
    net.fail_next_connects(2);
    let t = started(&net, quiet());

    t.send_text("early-1").unwrap();
    t.send_text("early-2").unwrap();
    assert!(wait_until(SETTLE, || net.data_frames().len() == 2));
    assert_eq!(net.data_frames(), ["early-1", "early-2"]);
    assert_eq!(net.connects(), 3);
}

#[test]
fn inbound_frames_are_delivered_in_network_order() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));

    for i in 0..5 {
        net.peer_sends(&format!("in-{}", i));
    }
    let got: Vec<String> = (0..5)
        .filter_map(|_| t.recv_text(Duration::from_secs(1)))
        .collect();
    assert_eq!(got, ["in-0", "in-1", "in-2", "in-3", "in-4"]);
    assert!(t.try_receive(Duration::from_millis(20)).is_none());
    assert_eq!(t.stats().frames_received, 5);
}

#[test]
fn full_inbound_queue_drops_newest_and_counts() {
    let net = MockNetwork::new();
    let t: Transport<MockNetwork, 16, 4> = Transport::new(net.clone(), quiet()).unwrap();
    t.start(URI).unwrap();
    assert!(wait_until(SETTLE, || t.is_connected()));

    for i in 0..6 {
        net.peer_sends(&format!("in-{}", i));
    }
    assert!(wait_until(SETTLE, || t.stats().inbound_dropped == 2));
    assert_eq!(t.inbound_depth(), 4);

    let got: Vec<String> = std::iter::from_fn(|| t.recv_text(Duration::ZERO)).collect();
    assert_eq!(got, ["in-0", "in-1", "in-2", "in-3"]);
}

#[test]
fn twenty_sends_into_sixteen_slots() {
    let net = MockNetwork::new();
    net.fail_next_connects(u32::MAX);
    let t = started(&net, cfg(10_000, &[60_000]));

    let results: Vec<_> = (0..20)
        .map(|i| t.send(Message::from_text(&format!("m{}", i))))
        .collect();
    assert!(results[..16].iter().all(Result::is_ok));
    assert!(results[16..].iter().all(|r| *r == Err(Error::QueueFull)));
    assert_eq!(t.outbound_depth(), 16);
}

#[test]
fn bounded_send_times_out_on_a_full_queue() {
    let net = MockNetwork::new();
    net.fail_next_connects(u32::MAX);
    let t: Transport<MockNetwork, 2, 2> = Transport::new(net.clone(), cfg(10_000, &[60_000])).unwrap();
    t.start(URI).unwrap();

    t.send_text("1").unwrap();
    t.send_text("2").unwrap();
    let start = Instant::now();
    let r = t.send_with_timeout(Message::from_text("3"), Duration::from_millis(60));
    assert_eq!(r, Err(Error::TimedOut));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn send_failure_drops_the_message_but_keeps_the_session() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));

    net.fail_next_sends(1);
    t.send_text("lost").unwrap();
    t.send_text("kept").unwrap();
    assert!(wait_until(SETTLE, || net.data_frames().len() == 1));
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(net.data_frames(), ["kept"]);
    assert_eq!(net.connects(), 1);
    assert!(t.is_connected());
    let stats = t.stats();
    assert_eq!(stats.send_failures, 1);
    assert_eq!(stats.frames_sent, 1);
}

// ── Reconnect / backoff ───────────────────────────────────────

#[test]
fn consecutive_failures_walk_the_backoff_schedule() {
    let schedule = [10, 20, 50, 100, 150, 300];
    let net = MockNetwork::new();
    net.fail_next_connects(6);
    let t = started(&net, cfg(10_000, &schedule));

    assert!(wait_until(Duration::from_secs(5), || t.is_connected()));
    let times = net.connect_times();
    assert_eq!(times.len(), 7);

    for (i, pair) in times.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        let want = Duration::from_millis(u64::from(schedule[i]));
        assert!(gap >= want, "gap {} = {:?}, want >= {:?}", i, gap, want);
        assert!(
            gap < want + Duration::from_millis(150),
            "gap {} = {:?}, want ~{:?}",
            i,
            gap,
            want
        );
    }

    let stats = t.stats();
    assert_eq!(stats.connect_attempts, 7);
    assert_eq!(stats.connect_failures, 6);
}

#[test]
fn delay_clamps_at_the_last_step() {
    let net = MockNetwork::new();
    net.fail_next_connects(5);
    let t = started(&net, cfg(10_000, &[10, 40]));

    assert!(wait_until(SETTLE, || t.is_connected()));
    let times = net.connect_times();
    for pair in times.windows(2).skip(1) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(40));
    }
}

#[test]
fn successful_connect_resets_the_backoff() {
    let net = MockNetwork::new();
    net.fail_next_connects(2);
    let t = started(&net, cfg(10_000, &[30, 300, 600]));
    assert!(wait_until(SETTLE, || t.is_connected()));
    assert_eq!(net.connects(), 3);

    // Drop the link and fail the first retry: the delay must be step one
    // again, not step three.
    net.fail_next_connects(1);
    net.peer_closes();
    assert!(wait_until(SETTLE, || net.connects() == 5 && t.is_connected()));

    let times = net.connect_times();
    let gap = times[4] - times[3];
    assert!(gap >= Duration::from_millis(30));
    assert!(gap < Duration::from_millis(250), "gap after reset was {:?}", gap);
}

#[test]
fn never_more_than_one_live_session() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    for _ in 0..5 {
        assert!(wait_until(SETTLE, || t.is_connected()));
        let before = net.connects();
        net.peer_closes();
        assert!(wait_until(SETTLE, || net.connects() > before));
    }
    assert_eq!(net.max_live_links(), 1);
}

// ── Liveness ──────────────────────────────────────────────────

#[test]
fn heartbeat_probe_is_sent_verbatim() {
    let net = MockNetwork::new();
    net.echo_heartbeats(true);
    let t = started(&net, cfg(30, &[10]));
    assert!(wait_until(SETTLE, || net.heartbeats() >= 1));

    let first = net.state().sent[0].clone();
    assert_eq!(first, HEARTBEAT_FRAME.as_bytes());
    assert!(t.stats().heartbeats_sent >= 1);
}

#[test]
fn heartbeat_goes_out_past_a_queued_backlog() {
    let net = MockNetwork::new();
    net.echo_heartbeats(true);
    net.send_delay(Duration::from_millis(20));
    let t = started(&net, cfg(50, &[10]));
    assert!(wait_until(SETTLE, || t.is_connected()));

    for i in 0..16 {
        t.send_text(&format!("d{}", i)).unwrap();
    }

    // A heartbeat never takes a queue slot: whatever is queued plus what
    // already went out never exceeds what was enqueued.
    let deadline = Instant::now() + SETTLE;
    while net.data_frames().len() < 16 && Instant::now() < deadline {
        let sent = net.data_frames().len();
        let queued = t.outbound_depth();
        assert!(sent + queued <= 16, "sent {} + queued {}", sent, queued);
        std::thread::sleep(Duration::from_millis(5));
    }

    let want: Vec<String> = (0..16).map(|i| format!("d{}", i)).collect();
    assert_eq!(net.data_frames(), want);

    // Draining takes ~320 ms; heartbeats keep their 50 ms cadence meanwhile
    // and overtake data still waiting in the queue.
    let sent = net.state().sent.clone();
    let is_hb = |f: &Vec<u8>| f.as_slice() == HEARTBEAT_FRAME.as_bytes();
    let first_hb = sent.iter().position(is_hb).unwrap();
    let last_data = sent.iter().rposition(|f| !is_hb(f)).unwrap();
    assert!(first_hb < last_data);
    let hb_during_drain = sent[..last_data].iter().filter(|f| is_hb(f)).count();
    assert!(hb_during_drain >= 3, "only {} heartbeats", hb_during_drain);

    let stats = t.stats();
    assert_eq!(stats.frames_sent, 16);
    assert!(stats.heartbeats_sent >= 3);
    assert_eq!(net.connects(), 1);
}

#[test]
fn last_activity_advances_on_inbound_data() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));
    let at_connect = t.last_activity().unwrap();

    std::thread::sleep(Duration::from_millis(30));
    net.peer_sends("hello");
    assert!(wait_until(SETTLE, || {
        t.last_activity().is_some_and(|at| at > at_connect)
    }));

    t.stop();
    assert_eq!(t.last_activity(), None);
}

#[test]
fn responsive_peer_keeps_the_link() {
    let net = MockNetwork::new();
    net.echo_heartbeats(true);
    let t = started(&net, cfg(40, &[10]));
    assert!(wait_until(SETTLE, || t.is_connected()));

    std::thread::sleep(Duration::from_millis(400));
    assert!(t.is_connected());
    assert_eq!(net.connects(), 1);
    assert!(net.heartbeats() >= 5, "only {} heartbeats", net.heartbeats());
    assert_eq!(t.stats().stale_disconnects, 0);
}

#[test]
fn silent_peer_is_dropped_as_stale_and_reconnected() {
    let net = MockNetwork::new();
    let t = started(&net, cfg(40, &[10]));
    assert!(wait_until(SETTLE, || t.is_connected()));
    let connected_at = Instant::now();

    assert!(wait_until(SETTLE, || net.connects() >= 2));
    let detected_after = connected_at.elapsed();

    // 2 x heartbeat plus at most one tick of slack.
    assert!(detected_after >= Duration::from_millis(75), "{:?}", detected_after);
    assert!(detected_after < Duration::from_millis(400), "{:?}", detected_after);
    assert!(t.stats().stale_disconnects >= 1);
    assert!(net.closes() >= 1);
}

#[test]
fn inbound_data_counts_as_activity() {
    let net = MockNetwork::new();
    let t = started(&net, cfg(40, &[10]));
    assert!(wait_until(SETTLE, || t.is_connected()));

    for i in 0..10 {
        net.peer_sends(&format!("tick-{}", i));
        std::thread::sleep(Duration::from_millis(30));
    }
    assert_eq!(net.connects(), 1);
    assert_eq!(t.stats().stale_disconnects, 0);
}

// ── Lifecycle ─────────────────────────────────────────────────

#[test]
fn start_twice_is_refused() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert_eq!(t.start(URI), Err(Error::AlreadyStarted));
}

#[test]
fn stop_while_connected_is_prompt_and_leaves_nothing_behind() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));
    net.peer_sends("unread");
    assert!(wait_until(SETTLE, || t.inbound_depth() == 1));

    let start = Instant::now();
    t.stop();
    assert!(start.elapsed() < Duration::from_millis(300));

    assert!(!t.is_connected());
    assert_eq!(t.state(), TransportState::Stopped);
    assert_eq!(t.outbound_depth(), 0);
    assert_eq!(t.inbound_depth(), 0);
    assert_eq!(net.closes(), 1);
    assert_eq!(t.send_text("late"), Err(Error::NotRunning));
}

#[test]
fn stop_during_a_blocking_connect_force_releases_the_worker() {
    let net = MockNetwork::new();
    net.connect_delay(Duration::from_millis(800));
    let t = started(&net, quiet());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(t.state(), TransportState::Connecting);

    let start = Instant::now();
    t.stop();
    let took = start.elapsed();
    assert!(took >= Duration::from_millis(150), "{:?}", took);
    assert!(took < Duration::from_millis(500), "{:?}", took);
    assert!(!t.is_connected());

    // The detached worker finishes its connect, closes it, and publishes
    // nothing.
    assert!(wait_until(SETTLE, || net.closes() == 1));
    assert!(!t.is_connected());
    assert_eq!(t.state(), TransportState::Stopped);
}

#[test]
fn restart_waits_for_a_released_worker() {
    let net = MockNetwork::new();
    net.connect_delay(Duration::from_millis(800));
    let t = started(&net, quiet());
    std::thread::sleep(Duration::from_millis(50));
    t.stop();

    // The released worker is still inside its connect.
    assert_eq!(t.start(URI), Err(Error::Busy));
    assert!(!t.is_running());

    net.connect_delay(Duration::ZERO);
    assert!(wait_until(SETTLE, || net.closes() == 1));
    t.start(URI).unwrap();
    assert!(wait_until(SETTLE, || t.is_connected()));
    assert_eq!(net.max_connects_in_flight(), 1);
    assert_eq!(net.max_live_links(), 1);
}

#[test]
fn transport_can_be_restarted_after_stop() {
    let net = MockNetwork::new();
    let t = started(&net, quiet());
    assert!(wait_until(SETTLE, || t.is_connected()));
    t.stop();

    t.start(URI).unwrap();
    assert!(wait_until(SETTLE, || t.is_connected()));
    t.send_text("second run").unwrap();
    assert!(wait_until(SETTLE, || net.data_frames() == ["second run"]));
    assert_eq!(net.connects(), 2);
    assert_eq!(t.stats().connect_attempts, 1);
}

#[test]
fn facade_is_usable_from_many_threads() {
    let net = MockNetwork::new();
    let t = std::sync::Arc::new(started(&net, quiet()));
    assert!(wait_until(SETTLE, || t.is_connected()));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let t = t.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    let msg = Message::from_text(&format!("p{}-{}", p, i));
                    t.send_with_timeout(msg, Duration::from_secs(1)).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert!(wait_until(SETTLE, || net.data_frames().len() == 40));
    // Per-producer order is preserved.
    let frames = net.data_frames();
    for p in 0..4 {
        let mine: Vec<_> = frames
            .iter()
            .filter(|f| f.starts_with(&format!("p{}-", p)))
            .cloned()
            .collect();
        let want: Vec<_> = (0..10).map(|i| format!("p{}-{}", p, i)).collect();
        assert_eq!(mine, want);
    }
}
