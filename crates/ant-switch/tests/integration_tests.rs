//! Integration tests for the antenna switch
//!
//! These tests drive the real UDP transport and listener against the
//! simulated relay board and TS-590SG emulator:
//! - Exclusive relay selection over the wire, including retries
//! - Controller timeouts leaving the selector state untouched
//! - Broadcast -> band -> relay end to end
//! - CAT emulator answering from broadcast state
//! - At most one relay on for any selection sequence

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ant_protocol::{Band, BandSet, RelayMask};
use ant_sim::{Ts590Server, VirtualRelayBoard};
use ant_switch::{
    run_antenna_switch, AntennaPortConfig, AntennaSwitch, BroadcastListener, PortConfigs,
    RelaySelector, RetryPolicy, SelectorConfig, SwitchError, TransportError, UdpRelayTransport,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Retry policy with short timeouts for quick failures
    pub fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            reply_timeout: Duration::from_millis(100),
        }
    }

    /// Selector over UDP with no cooldown
    pub fn udp_selector(remote: SocketAddr) -> RelaySelector<UdpRelayTransport> {
        let transport = UdpRelayTransport::with_policy(remote, fast_policy(), CancellationToken::new());
        RelaySelector::with_config(
            transport,
            SelectorConfig {
                cooldown: Duration::ZERO,
            },
        )
    }

    /// Dipole on 40m and 20m, yagi on 20m, vertical on 80m
    pub fn station_ports() -> PortConfigs {
        PortConfigs::new(vec![
            AntennaPortConfig::new(1, BandSet::empty().with(Band::M40).with(Band::M20))
                .with_name("Dipole"),
            AntennaPortConfig::new(2, BandSet::empty().with(Band::M20)).with_name("Yagi"),
            AntennaPortConfig::new(3, BandSet::empty().with(Band::M80)).with_name("Vertical"),
        ])
    }

    pub fn radio_info(hz: u64) -> String {
        format!(
            "<?xml version=\"1.0\"?><RadioInfo><RadioNr>1</RadioNr>\
             <Freq>{}</Freq><TXFreq>{}</TXFreq><Mode>CW</Mode>\
             <IsSplit>False</IsSplit><IsTransmitting>False</IsTransmitting>\
             <ActiveRadioNr>1</ActiveRadioNr></RadioInfo>",
            hz, hz
        )
    }

    pub async fn broadcast(to: SocketAddr, payload: &str) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(payload.as_bytes(), to).await.unwrap();
    }

    /// Poll until the board reports `mask`
    pub async fn wait_for_mask(board: &VirtualRelayBoard, mask: RelayMask) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while board.mask() != mask {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("board never reached {:?}, has {:?}", mask, board.mask()));
    }
}

use helpers::*;

// ============================================================================
// Relay Selection Over UDP
// ============================================================================

mod relay_transport {
    use super::*;

    #[tokio::test]
    async fn test_selection_turns_others_off_first() {
        let board = VirtualRelayBoard::start_with_mask(localhost(), RelayMask::from_bits(0b1010))
            .await
            .unwrap();
        let selector = udp_selector(board.local_addr());

        assert!(selector.set_relay_for_antenna(3, Band::M20).await.unwrap());
        assert_eq!(board.mask(), RelayMask::only(3));
        assert_eq!(
            board.received(),
            vec![
                "RELAY-STATE-255",
                "RELAY-SET-255,2,0",
                "RELAY-SET-255,4,0",
                "RELAY-SET-255,3,1",
            ]
        );
        assert_eq!(selector.currently_selected(), Some(3));

        board.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_datagram_is_retried() {
        let board = VirtualRelayBoard::start(localhost()).await.unwrap();
        let selector = udp_selector(board.local_addr());

        board.drop_next(1);
        selector.set_relay_for_antenna(5, Band::M15).await.unwrap();

        // The state query was sent twice, the first copy dropped
        let received = board.received();
        assert_eq!(received[0], "RELAY-STATE-255");
        assert_eq!(received[1], "RELAY-STATE-255");
        assert_eq!(board.mask(), RelayMask::only(5));

        board.stop().await;
    }

    #[tokio::test]
    async fn test_silent_controller_times_out_without_state_change() {
        let board = VirtualRelayBoard::start(localhost()).await.unwrap();
        let selector = udp_selector(board.local_addr());
        selector.set_relay_for_antenna(1, Band::M40).await.unwrap();

        board.clear_received();
        board.drop_next(usize::MAX);
        let err = selector
            .set_relay_for_antenna(2, Band::M20)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwitchError::Transport(TransportError::Timeout { attempts: 3, .. })
        ));
        assert_eq!(board.received().len(), 3);
        assert_eq!(selector.currently_selected(), Some(1));
        assert_eq!(board.mask(), RelayMask::only(1));

        board.stop().await;
    }

    #[tokio::test]
    async fn test_all_off_over_udp() {
        let board = VirtualRelayBoard::start_with_mask(localhost(), RelayMask::only(7))
            .await
            .unwrap();
        let selector = udp_selector(board.local_addr());

        selector.turn_off_all().await.unwrap();
        assert!(board.mask().is_empty());
        assert_eq!(board.received(), vec!["RELAY-AOF-255,1,1"]);
        assert!(selector.all_relay_states().values().all(|on| !on));

        board.stop().await;
    }
}

// ============================================================================
// End To End
// ============================================================================

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn test_broadcasts_drive_relays() {
        let board = VirtualRelayBoard::start(localhost()).await.unwrap();
        let selector = Arc::new(udp_selector(board.local_addr()));
        let switch = Arc::new(AntennaSwitch::new(selector, station_ports()));

        let mut listener = BroadcastListener::new();
        let addr = listener.start("127.0.0.1", 0).await.unwrap();

        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let actor = tokio::spawn(run_antenna_switch(
            switch.clone(),
            listener.subscribe(),
            cmd_rx,
            cancel.clone(),
        ));

        broadcast(addr, &radio_info(7_030_000)).await;
        wait_for_mask(&board, RelayMask::only(1)).await;
        assert_eq!(switch.current_band(), Band::M40);

        broadcast(addr, &radio_info(3_550_000)).await;
        wait_for_mask(&board, RelayMask::only(3)).await;

        // Out of band: relays stay where they are
        broadcast(addr, &radio_info(5_357_000)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(board.mask(), RelayMask::only(3));
        assert_eq!(switch.current_band(), Band::Unknown);

        cancel.cancel();
        actor.await.unwrap();
        listener.stop().await;
        board.stop().await;
    }

    #[tokio::test]
    async fn test_emulator_reports_broadcast_state() {
        let mut listener = BroadcastListener::new();
        let addr = listener.start("127.0.0.1", 0).await.unwrap();

        let mut server = Ts590Server::new(listener.state());
        let cat_addr = server.start(localhost()).await.unwrap();
        let mut client = TcpStream::connect(cat_addr).await.unwrap();

        let mut latest = listener.state();
        broadcast(addr, &radio_info(14_025_500)).await;
        tokio::time::timeout(Duration::from_secs(1), latest.changed())
            .await
            .unwrap()
            .unwrap();

        client.write_all(b"FA;MD;").await.unwrap();
        let mut buf = [0u8; 18];
        tokio::time::timeout(Duration::from_secs(1), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"FA00014025500;MD3;");

        server.stop().await;
        listener.stop().await;
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use ant_protocol::RelayCommand;
    use ant_sim::RelayBoard;
    use ant_switch::RelayLink;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct BoardLink {
        board: Mutex<RelayBoard>,
    }

    #[async_trait]
    impl RelayLink for BoardLink {
        async fn send_and_receive(
            &self,
            message: &str,
            _timeout: Duration,
        ) -> Result<String, TransportError> {
            Ok(self
                .board
                .lock()
                .unwrap()
                .handle(message)
                .unwrap_or_default())
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Select(u8),
        Off(u8),
        AllOff,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..=18).prop_map(Op::Select),
            (1u8..=16).prop_map(Op::Off),
            Just(Op::AllOff),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_relay_on(ops in prop::collection::vec(op(), 1..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            runtime.block_on(async {
                let selector = RelaySelector::with_config(BoardLink::default(), SelectorConfig { cooldown: Duration::ZERO });

                for op in ops {
                    let _ = match op {
                        Op::Select(relay) => selector.set_relay_for_antenna(relay, Band::M20).await.map(|_| ()),
                        Op::Off(relay) => selector.set_relay(relay, false).await.map(|_| ()),
                        Op::AllOff => selector.turn_off_all().await,
                    };

                    let board = selector.link().board.lock().unwrap().mask();
                    prop_assert!(board.on_relays().count() <= 1);
                    prop_assert_eq!(board, selector.relay_mask());
                }
                Ok(())
            })?;
        }

        #[test]
        fn expected_reply_acknowledges_command(relay in 1u8..=16, on in any::<bool>()) {
            let command = RelayCommand::Set { relay, on };
            let mut board = RelayBoard::new();
            let reply = board.handle(&command.encode()).unwrap();
            prop_assert!(reply.contains(&command.expected_reply()));
        }
    }
}
