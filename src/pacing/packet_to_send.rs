/*
 *  Copyright (c) 2019 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::{DataSize, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Audio,
    Video,
    Retransmission,
    ForwardErrorCorrection,
    Padding,
}

/// What the pacer needs to know about an outgoing packet. The serialized
/// bytes stay with the packet sender, which can find them again through the
/// ssrc and sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketToSend {
    pub packet_type: PacketType,
    pub ssrc: u32,
    pub sequence_number: u16,
    pub capture_time: Timestamp,
    pub header_size: DataSize,
    pub payload_size: DataSize,
    pub padding_size: DataSize,
}

impl PacketToSend {
    // Fixed RTP header without csrcs or extensions.
    pub const DEFAULT_HEADER_SIZE: DataSize = DataSize::from_bytes(12);

    pub fn new(
        packet_type: PacketType,
        ssrc: u32,
        sequence_number: u16,
        payload_size: DataSize,
    ) -> Self {
        Self {
            packet_type,
            ssrc,
            sequence_number,
            capture_time: Timestamp::minus_infinity(),
            header_size: Self::DEFAULT_HEADER_SIZE,
            payload_size,
            padding_size: DataSize::zero(),
        }
    }

    pub fn padding(ssrc: u32, sequence_number: u16, padding_size: DataSize) -> Self {
        Self {
            padding_size,
            ..Self::new(PacketType::Padding, ssrc, sequence_number, DataSize::zero())
        }
    }

    /// Size counted against the pacing budgets when overhead is not included.
    pub fn payload_and_padding_size(&self) -> DataSize {
        self.payload_size + self.padding_size
    }

    pub fn size(&self) -> DataSize {
        self.header_size + self.payload_size + self.padding_size
    }
}
