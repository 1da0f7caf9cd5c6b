mod common;

use atmega128_bootloader::drivers::flash::{FlashControl, FlashError};
use atmega128_bootloader::protocol::PacketType;
use atmega128_bootloader::{AbortReason, Outcome, Step};
use common::*;

const SYNC: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

fn sync(bl: &mut TestBootloader<'_>) {
    link(bl).feed(&SYNC);
    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::WaitForUpdateReq);
    assert_eq!(link(bl).take_sent_types(), [PacketType::SeqObserved]);
}

/// Runs the handshake up to the point where the length response is due.
fn handshake(bl: &mut TestBootloader<'_>) {
    sync(bl);

    link(bl).feed_packet(&control(PacketType::FwUpdateReq));
    assert_eq!(bl.poll(), None);
    assert_eq!(
        link(bl).take_sent_types(),
        [PacketType::Ack, PacketType::FwUpdateRes]
    );

    assert_eq!(bl.poll(), None);
    assert_eq!(link(bl).take_sent_types(), [PacketType::DeviceIdReq]);
    assert_eq!(bl.step(), Step::DeviceIdRes);

    link(bl).feed_packet(&packet(PacketType::DeviceIdRes, &[0x69]));
    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::FwLengthReq);

    assert_eq!(bl.poll(), None);
    assert_eq!(
        link(bl).take_sent_types(),
        [PacketType::Ack, PacketType::FwLengthReq]
    );
    assert_eq!(bl.step(), Step::FwLengthRes);
}

/// Announces `length` and lets the erase run.
fn announce(bl: &mut TestBootloader<'_>, length: u32) {
    link(bl).feed_packet(&packet(PacketType::FwLengthRes, &length.to_le_bytes()));
    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::EraseApp);

    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::ReceiveFirmware);
    assert_eq!(
        link(bl).take_sent_types(),
        [PacketType::Ack, PacketType::ReadyForFirmware]
    );
}

fn assert_aborted_with_notice(bl: &mut TestBootloader<'_>) {
    let sent = link(bl).take_sent_types();
    assert_eq!(sent.last(), Some(&PacketType::FwUpdateAborted));
}

#[test]
fn sync_pattern_advances() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);

    link(&mut bl).feed(&[0x00, 0x42]);
    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::Sync);

    sync(&mut bl);
}

#[test]
fn near_miss_sync_does_not_advance() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);

    link(&mut bl).feed(&[0x11, 0x22, 0x33, 0x45, 0x22, 0x33, 0x44]);
    assert_eq!(bl.poll(), None);

    assert_eq!(bl.step(), Step::Sync);
    assert!(link(&mut bl).take_sent().is_empty());
}

#[test]
fn bytes_after_sync_stay_for_framing() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);

    let mut burst = SYNC.to_vec();
    burst.extend_from_slice(&control(PacketType::FwUpdateReq).to_bytes());
    link(&mut bl).feed(&burst);

    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::WaitForUpdateReq);
    assert_eq!(bl.poll(), None);
    assert_eq!(bl.step(), Step::DeviceIdReq);
}

#[test]
fn forty_byte_image_is_programmed() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 40);
    assert_eq!(bl.firmware_length(), 40);
    assert_eq!(bl.flash().programmer().erased, [1, 2]);

    let image: Vec<u8> = (0..40).collect();
    for chunk in image.chunks(16) {
        link(&mut bl).feed_packet(&packet(PacketType::Data, chunk));
        assert_eq!(bl.poll(), None);
    }
    assert_eq!(bl.bytes_received(), 40);
    assert_eq!(bl.step(), Step::Done);

    assert_eq!(bl.poll(), Some(Outcome::Completed { length: 40 }));
    assert_eq!(
        link(&mut bl).take_sent_types(),
        [
            PacketType::Ack,
            PacketType::Ack,
            PacketType::Ack,
            PacketType::UpdateSuccessful
        ]
    );

    let programmer = bl.flash().programmer();
    assert_eq!(programmer.app_bytes(40), &image[..]);
    assert!(programmer.app_bytes(64)[40..].iter().all(|&b| b == 0xFF));
    assert!(!programmer.unlocked);
    assert!(bl.log().contains("fw update done!"));
}

#[test]
fn finished_session_stays_finished() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 3);

    link(&mut bl).feed_packet(&packet(PacketType::Data, &[7, 8, 9]));
    assert_eq!(bl.poll(), None);
    let outcome = bl.poll();
    assert_eq!(outcome, Some(Outcome::Completed { length: 3 }));
    link(&mut bl).take_sent();

    clock.advance(60_000);
    assert_eq!(bl.poll(), outcome);
    assert_eq!(bl.outcome(), outcome);
    assert!(link(&mut bl).take_sent().is_empty());
}

#[test]
fn oversized_firmware_aborts_before_erase() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);

    link(&mut bl).feed_packet(&packet(PacketType::FwLengthRes, &4096u32.to_le_bytes()));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::FwLengthRes,
            reason: AbortReason::FirmwareTooLarge {
                length: 4096,
                available: APP_SIZE
            }
        })
    );

    assert_aborted_with_notice(&mut bl);
    assert!(bl.flash().programmer().erased.is_empty());
    assert!(bl.log().contains("new firmware size is 4096"));
    assert!(bl.log().contains(
        "bootloader FW update aborted at: fw_length_res, reason: firmware size exceeded"
    ));
}

#[test]
fn zero_length_firmware_aborts() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);

    link(&mut bl).feed_packet(&packet(PacketType::FwLengthRes, &0u32.to_le_bytes()));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::FwLengthRes,
            reason: AbortReason::EmptyFirmware
        })
    );
    assert!(bl.flash().programmer().erased.is_empty());
}

#[test]
fn length_response_must_carry_four_bytes() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);

    link(&mut bl).feed_packet(&packet(PacketType::FwLengthRes, &[0x10, 0x00]));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::FwLengthRes,
            reason: AbortReason::InvalidLength {
                expected: 4,
                actual: 2
            }
        })
    );
}

#[test]
fn wrong_device_id_aborts() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    sync(&mut bl);

    link(&mut bl).feed_packet(&control(PacketType::FwUpdateReq));
    bl.poll();
    bl.poll();
    link(&mut bl).take_sent();

    link(&mut bl).feed_packet(&packet(PacketType::DeviceIdRes, &[0x42]));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::DeviceIdRes,
            reason: AbortReason::InvalidDeviceId(0x42)
        })
    );
    assert_eq!(
        link(&mut bl).take_sent_types(),
        [PacketType::Ack, PacketType::FwUpdateAborted]
    );
}

#[test]
fn unexpected_packet_aborts() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    sync(&mut bl);

    link(&mut bl).feed_packet(&control(PacketType::DeviceIdReq));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::WaitForUpdateReq,
            reason: AbortReason::UnexpectedPacket {
                expected: PacketType::FwUpdateReq,
                actual: PacketType::DeviceIdReq as u8
            }
        })
    );
    assert_aborted_with_notice(&mut bl);
    assert!(bl
        .log()
        .contains("expected to receive (FW_UPDATE_REQ), instead got (DEVICE_ID_REQ)"));
}

#[test]
fn silence_times_out() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);

    clock.advance(4_999);
    assert_eq!(bl.poll(), None);
    clock.advance(1);
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::Sync,
            reason: AbortReason::Timeout
        })
    );
    assert_aborted_with_notice(&mut bl);
}

#[test]
fn progress_rearms_the_deadline() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);

    clock.advance(4_000);
    sync(&mut bl);
    clock.advance(4_000);
    assert_eq!(bl.poll(), None);

    // A frame that fails its CRC is not progress
    let mut corrupt = control(PacketType::FwUpdateReq).to_bytes();
    corrupt[3] ^= 0x01;
    link(&mut bl).feed(&corrupt);
    clock.advance(999);
    assert_eq!(bl.poll(), None);
    assert_eq!(link(&mut bl).take_sent_types(), [PacketType::Retx]);

    clock.advance(1);
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::WaitForUpdateReq,
            reason: AbortReason::Timeout
        })
    );
}

#[test]
fn each_chunk_rearms_the_deadline() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 32);

    for _ in 0..2 {
        clock.advance(4_500);
        link(&mut bl).feed_packet(&packet(PacketType::Data, &[0xA5; 16]));
        assert_eq!(bl.poll(), None);
    }
    assert_eq!(bl.step(), Step::Done);
}

#[test]
fn silence_between_chunks_times_out() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 32);

    link(&mut bl).feed_packet(&packet(PacketType::Data, &[0x3C; 16]));
    assert_eq!(bl.poll(), None);
    link(&mut bl).take_sent();

    clock.advance(4_999);
    assert_eq!(bl.poll(), None);
    clock.advance(1);
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::ReceiveFirmware,
            reason: AbortReason::Timeout
        })
    );
    assert_eq!(bl.bytes_received(), 16);
    assert_eq!(link(&mut bl).take_sent_types(), [PacketType::FwUpdateAborted]);
}

#[test]
fn full_packet_queue_bounces_chunks_with_retx() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, APP_SIZE);

    let chunks: Vec<_> = (0..20u8)
        .map(|i| packet(PacketType::Data, &[i; 16]))
        .collect();
    for chunk in &chunks {
        link(&mut bl).feed_packet(chunk);
    }

    // One burst: the queue takes 13 frames, the rest are asked for again
    assert_eq!(bl.poll(), None);
    let mut expected = vec![PacketType::Ack; 13];
    expected.extend([PacketType::Retx; 7]);
    assert_eq!(link(&mut bl).take_sent_types(), expected);

    for _ in 0..13 {
        assert_eq!(bl.poll(), None);
    }
    assert_eq!(bl.bytes_received(), 13 * 16);
    assert!(link(&mut bl).take_sent().is_empty());

    // The host resends the first bounced chunk and it lands in order
    link(&mut bl).feed_packet(&chunks[13]);
    assert_eq!(bl.poll(), None);
    assert_eq!(link(&mut bl).take_sent_types(), [PacketType::Ack]);
    assert_eq!(bl.bytes_received(), 14 * 16);

    let programmer = bl.flash().programmer();
    for i in 0..14u8 {
        let start = i as usize * 16;
        assert!(programmer.app_bytes(start + 16)[start..].iter().all(|&b| b == i));
    }
}

#[test]
fn chunk_past_announced_length_aborts() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 20);

    link(&mut bl).feed_packet(&packet(PacketType::Data, &[1; 16]));
    assert_eq!(bl.poll(), None);
    link(&mut bl).feed_packet(&packet(PacketType::Data, &[2; 16]));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::ReceiveFirmware,
            reason: AbortReason::FirmwareOverrun {
                length: 20,
                received: 32
            }
        })
    );
    assert_eq!(bl.bytes_received(), 16);
}

#[test]
fn data_length_outside_payload_aborts() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    handshake(&mut bl);
    announce(&mut bl, 64);

    let mut bogus = packet(PacketType::Data, &[0; 16]);
    bogus.length = 17;
    bogus.seal();
    link(&mut bl).feed_packet(&bogus);

    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::ReceiveFirmware,
            reason: AbortReason::InvalidChunkLength(17)
        })
    );
}

#[test]
fn flash_write_failure_aborts() {
    let clock = MockClock::default();
    let programmer = MemProgrammer {
        fail_writes: true,
        ..MemProgrammer::default()
    };
    let mut bl = bootloader_with(&clock, programmer).unwrap();
    assert_eq!(bl.flash().available_size(), APP_SIZE);
    handshake(&mut bl);
    announce(&mut bl, 16);

    link(&mut bl).feed_packet(&packet(PacketType::Data, &[0x55; 16]));
    assert_eq!(
        bl.poll(),
        Some(Outcome::Aborted {
            step: Step::ReceiveFirmware,
            reason: AbortReason::Flash(FlashError::WriteError)
        })
    );
    assert!(bl.log().contains("reason: flash write failed"));
}

#[test]
fn dual_bank_part_is_refused() {
    let clock = MockClock::default();
    let programmer = MemProgrammer {
        dual_bank: true,
        ..MemProgrammer::default()
    };

    match bootloader_with(&clock, programmer) {
        Err(reason) => assert_eq!(reason, AbortReason::DualBankEnabled),
        Ok(_) => panic!("dual-bank flash accepted"),
    }
}

#[test]
fn abort_dumps_comms_stats() {
    let clock = MockClock::default();
    let mut bl = bootloader(&clock);
    sync(&mut bl);

    clock.advance(5_000);
    bl.poll();
    let log = bl.log();
    assert!(log.contains("Comms Stats:\n"));
    assert!(log.contains("SEQ_OBSERVED: tx 1 rx 0\n"));
    assert!(log.contains("FW_UPDATE_ABORTED: tx 1 rx 0\n"));
}
