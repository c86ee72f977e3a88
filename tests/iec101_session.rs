//! IEC 101 master and slave over an in-memory serial line.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;
use voltage_iec60870::cs101::{ControlField, PrimaryFunction, SecondaryFunction};
use voltage_iec60870::{
    AppLayerParameters, Asdu, CloseReason, ConnectionEvent, Cot, Ft12Codec, Iec101Master,
    Iec101Slave, InformationObject, InterrogationQualifier, LinkFrame, LinkLayerParameters,
    LinkState, Quality, QualityDescriptor, ScaledValue, SinglePointInfo, TypeId,
};

fn link() -> LinkLayerParameters {
    LinkLayerParameters::default()
        .timeout_for_ack(Duration::from_millis(200))
        .init_timeout(Duration::from_secs(2))
        .poll_interval(Duration::from_secs(1))
}

fn scaled(cot: Cot, value: i16) -> Asdu {
    Asdu::new(TypeId::MeasuredScaled, cot, 1)
        .with_object(InformationObject::new(
            200,
            vec![
                ScaledValue(value).into(),
                QualityDescriptor::new(Quality::GOOD).unwrap().into(),
            ],
        ))
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_master_slave_session() {
    let params = AppLayerParameters::iec101();
    let (master_io, slave_io) = tokio::io::duplex(4096);

    let (slave, mut slave_events) = Iec101Slave::spawn(slave_io, 1, link(), params).unwrap();
    let (master, mut master_events) = Iec101Master::open(master_io, &[1], link(), params)
        .await
        .unwrap();

    assert_eq!(slave_events.recv().await.unwrap(), ConnectionEvent::Ready);
    let mut handshake = Vec::new();
    for _ in 0..3 {
        handshake.push(master_events.recv().await.unwrap());
    }
    assert_eq!(
        handshake,
        vec![
            ConnectionEvent::LinkStateChanged {
                address: 1,
                state: LinkState::LinkStatusKnown,
            },
            ConnectionEvent::LinkStateChanged {
                address: 1,
                state: LinkState::LinkActive,
            },
            ConnectionEvent::Ready,
        ]
    );

    // Command from the master as confirmed user data
    let command = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
    master.send_asdu(command.clone()).await.unwrap();
    assert_eq!(
        slave_events.recv().await.unwrap(),
        ConnectionEvent::AsduReceived(command.clone())
    );

    // Slave answers through the poll cycle: class 1 first, class 2 next
    let confirmation = command.mirror(Cot::ActivationConfirm, false);
    let cyclic = scaled(Cot::Periodic, -120);
    slave.send_asdu(cyclic.clone()).await.unwrap();
    slave.send_asdu(confirmation.clone()).await.unwrap();

    assert_eq!(
        master_events.recv().await.unwrap(),
        ConnectionEvent::AsduReceived(confirmation)
    );
    assert_eq!(
        master_events.recv().await.unwrap(),
        ConnectionEvent::AsduReceived(cyclic)
    );

    master.close().await;
    assert_eq!(
        slave_events.recv().await.unwrap(),
        ConnectionEvent::Lost(CloseReason::RemoteClosed)
    );
    assert!(slave.is_closed());
}

#[tokio::test]
async fn test_slave_bytes_on_the_wire() {
    let line = tokio_test::io::Builder::new()
        // Request status of link, address 1
        .read(&[0x10, 0x49, 0x01, 0x4A, 0x16])
        // Status of link
        .write(&[0x10, 0x0B, 0x01, 0x0C, 0x16])
        // Reset of remote link
        .read(&[0x10, 0x40, 0x01, 0x41, 0x16])
        .write(&[0xE5])
        // Request class 2 data, FCB set
        .read(&[0x10, 0x7B, 0x01, 0x7C, 0x16])
        .write(&[0xE5])
        .build();

    let (_slave, mut events) = Iec101Slave::spawn(
        line,
        1,
        LinkLayerParameters::default(),
        AppLayerParameters::iec101(),
    )
    .unwrap();

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);
    assert_eq!(
        events.recv().await.unwrap(),
        ConnectionEvent::Lost(CloseReason::RemoteClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_master_polls_every_secondary() {
    let (master_io, line_io) = tokio::io::duplex(4096);
    let mut line = Framed::new(line_io, Ft12Codec::default());

    // Two secondaries sharing the line, both with nothing to report
    let secondaries = tokio::spawn(async move {
        let mut polled = Vec::new();
        while let Some(Ok(frame)) = line.next().await {
            let (Some(ControlField::Primary { function, .. }), Some(address)) =
                (frame.control(), frame.address())
            else {
                continue;
            };
            let response = match function {
                PrimaryFunction::RequestLinkStatus => {
                    LinkFrame::secondary(SecondaryFunction::StatusOfLink, false, address)
                }
                PrimaryFunction::RequestClass1 | PrimaryFunction::RequestClass2 => {
                    polled.push(address);
                    LinkFrame::secondary(SecondaryFunction::RespNackNoData, false, address)
                }
                _ => LinkFrame::SingleAck,
            };
            if line.send(response).await.is_err() {
                break;
            }
            if polled.len() == 4 {
                break;
            }
        }
        polled
    });

    let (master, _events) =
        Iec101Master::open(master_io, &[7, 9], link(), AppLayerParameters::iec101())
            .await
            .unwrap();
    assert_eq!(
        master.link_states().await.unwrap(),
        vec![(7, LinkState::LinkActive), (9, LinkState::LinkActive)]
    );

    let polled = secondaries.await.unwrap();
    assert_eq!(polled, vec![7, 9, 7, 9]);
    master.close().await;
}

/// Relay frames between master and slave, losing every confirmed user
/// data frame on its way to the slave.
async fn lossy_line(master_side: DuplexStream, slave_side: DuplexStream) {
    let mut master = Framed::new(master_side, Ft12Codec::default());
    let mut slave = Framed::new(slave_side, Ft12Codec::default());
    loop {
        tokio::select! {
            frame = master.next() => match frame {
                Some(Ok(frame)) => {
                    let lost = matches!(
                        frame.control(),
                        Some(ControlField::Primary {
                            function: PrimaryFunction::UserDataConfirmed,
                            ..
                        })
                    );
                    if !lost && slave.send(frame).await.is_err() {
                        return;
                    }
                }
                _ => return,
            },
            frame = slave.next() => match frame {
                Some(Ok(frame)) => {
                    if master.send(frame).await.is_err() {
                        return;
                    }
                }
                _ => return,
            },
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_user_data_does_not_repeat_delivery() {
    let params = AppLayerParameters::iec101();
    let (master_io, line_a) = tokio::io::duplex(4096);
    let (line_b, slave_io) = tokio::io::duplex(4096);
    tokio::spawn(lossy_line(line_a, line_b));

    let (slave, _slave_events) = Iec101Slave::spawn(slave_io, 1, link(), params).unwrap();
    let spontaneous = Asdu::new(TypeId::SinglePoint, Cot::Spontaneous, 1)
        .with_object(InformationObject::new(
            100,
            vec![SinglePointInfo::new(true, Quality::GOOD).unwrap().into()],
        ))
        .unwrap();
    slave.send_asdu(spontaneous.clone()).await.unwrap();

    let (master, mut events) = Iec101Master::open(master_io, &[1], link(), params)
        .await
        .unwrap();
    loop {
        if let ConnectionEvent::AsduReceived(asdu) = events.recv().await.unwrap() {
            assert_eq!(asdu, spontaneous);
            break;
        }
    }

    let command = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
    assert!(matches!(
        master.send_asdu(command).await,
        Err(voltage_iec60870::Iec60870Error::RetriesExhausted { address: 1 })
    ));

    // Link goes down and comes back through a fresh reset
    let mut states = Vec::new();
    while states.last() != Some(&LinkState::LinkActive) {
        match events.recv().await.unwrap() {
            ConnectionEvent::LinkStateChanged { state, .. } => states.push(state),
            ConnectionEvent::AsduReceived(asdu) => panic!("delivered twice: {:?}", asdu),
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            LinkState::Disconnected,
            LinkState::LinkStatusKnown,
            LinkState::LinkActive,
        ]
    );

    // Several poll cycles later nothing has been delivered again
    tokio::time::sleep(Duration::from_secs(5)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConnectionEvent::AsduReceived(_)),
            "delivered twice: {:?}",
            event
        );
    }
    master.close().await;
}
