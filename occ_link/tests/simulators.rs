//! Pipe and socket simulator round trips

use occ::packet::Packet;
use occ::packet::command::Command;
use occ_link::ring::{CircularBuffer, DirectRing, DmaCopier};
use occ_link::{
    BoardType, Interface, LinkControl, LinkError, LinkKind, LinkResult, OccHandle, Transport,
};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

fn sample_packet() -> Packet {
    Packet::create_occ(0x0A00_0003, Command::ReadStatus, 0, &[1, 2, 3, 4]).unwrap()
}

fn pipe_device(dir: &tempfile::TempDir) -> String {
    format!(
        "{},{}",
        dir.path().join("rx").display(),
        dir.path().join("tx").display()
    )
}

#[test]
fn pipe_receive_and_send() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    handle.enable_receive(true)?;

    let pkt = sample_packet();
    let mut feed = OpenOptions::new().write(true).open(dir.path().join("rx")).unwrap();
    feed.write_all(pkt.as_bytes()).unwrap();

    let data = handle.wait_for_data(WAIT)?;
    assert_eq!(data, pkt.as_bytes());
    let len = data.len();
    handle.acknowledge(len)?;

    let sent = handle.send(pkt.as_bytes())?;
    assert_eq!(sent, pkt.as_bytes().len());
    let mut drain = OpenOptions::new().read(true).open(dir.path().join("tx")).unwrap();
    let mut echoed = vec![0u8; sent];
    drain.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, pkt.as_bytes());
    Ok(())
}

#[test]
fn pipe_refuses_wait_while_receive_disabled() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    assert_eq!(handle.wait_for_data(None).err(), Some(LinkError::NotConnected));
    handle.enable_receive(true)?;
    assert!(handle.rx_enabled());
    handle.reset()?;
    assert!(!handle.rx_enabled());
    Ok(())
}

#[test]
fn pipe_read_copies_and_acknowledges() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    handle.enable_receive(true)?;

    let mut feed = OpenOptions::new().write(true).open(dir.path().join("rx")).unwrap();
    feed.write_all(&[9u8; 64]).unwrap();

    let mut buf = [0u8; 40];
    assert_eq!(handle.read(&mut buf, WAIT)?, 40);
    assert_eq!(handle.read(&mut buf, WAIT)?, 24);
    assert_eq!(
        handle.read(&mut buf, Some(Duration::from_millis(20))).err(),
        Some(LinkError::Timeout)
    );
    Ok(())
}

#[test]
fn pipe_status_and_registers() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    let status = handle.status()?;
    assert_eq!(status.board, BoardType::Simulator);
    assert!(!status.rx_enabled);
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["board"], "simulator");
    assert_eq!(json["interface"], "optical");

    let control = handle.control();
    let mut words = [0u32; 4];
    assert!(matches!(
        control.register_read(0, 0, &mut words),
        Err(LinkError::Unsupported { .. })
    ));
    assert!(matches!(
        control.register_read(0, 3, &mut words),
        Err(LinkError::InvalidArgument { .. })
    ));
    Ok(())
}

#[test]
fn pipe_rejects_plain_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("rx"), b"not a fifo").unwrap();
    assert!(matches!(
        OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical),
        Err(LinkError::InvalidArgument { .. })
    ));
}

#[test]
fn socket_round_trip_and_disconnect() -> LinkResult<()> {
    let mut handle = OccHandle::open("127.0.0.1:0", LinkKind::Socket, Interface::Socket)?;
    let addr = handle.local_addr().unwrap();
    handle.enable_receive(true)?;

    let mut client = TcpStream::connect(addr).unwrap();
    let pkt = sample_packet();
    client.write_all(pkt.as_bytes()).unwrap();

    let data = handle.wait_for_data(WAIT)?;
    assert_eq!(data, pkt.as_bytes());
    let len = data.len();
    handle.acknowledge(len)?;

    handle.send(pkt.as_bytes())?;
    let mut echoed = vec![0u8; pkt.as_bytes().len()];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, pkt.as_bytes());

    assert_eq!(handle.status()?.interface, Interface::Socket);

    drop(client);
    assert_eq!(handle.wait_for_data(WAIT).err(), Some(LinkError::ConnectionReset));
    Ok(())
}

#[test]
fn copier_feeds_local_ring() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    handle.enable_receive(true)?;
    let control = handle.control();

    let (copier, mut ring) = DmaCopier::start(handle, 64 * 1024, Duration::from_millis(10))?;
    assert!(copier.is_running());

    let pkt = sample_packet();
    let mut feed = OpenOptions::new().write(true).open(dir.path().join("rx")).unwrap();
    for _ in 0..3 {
        feed.write_all(pkt.as_bytes()).unwrap();
    }

    let expected = pkt.as_bytes().len() * 3;
    let mut received = Vec::new();
    while received.len() < expected {
        let window = ring.wait_timeout(WAIT)?;
        received.extend_from_slice(window);
        let len = window.len();
        ring.consume(len)?;
    }
    assert_eq!(received, pkt.as_bytes().repeat(3));

    // Commands still go out while the copier owns the receive half.
    control.send(pkt.as_bytes())?;

    let handle = copier.stop();
    assert!(handle.is_some());
    assert_eq!(ring.wait().err(), Some(LinkError::Shutdown));
    Ok(())
}

#[test]
fn direct_ring_over_pipe() -> LinkResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = OccHandle::open(&pipe_device(&dir), LinkKind::Pipe, Interface::Optical)?;
    handle.enable_receive(true)?;
    let mut ring = DirectRing::new(handle)?;

    let mut feed = OpenOptions::new().write(true).open(dir.path().join("rx")).unwrap();
    feed.write_all(&[5u8; 30]).unwrap();

    let window = ring.wait_timeout(WAIT)?;
    assert_eq!(window.len(), 28);
    ring.consume(100)?;
    assert_eq!(ring.used(), 0);
    Ok(())
}
