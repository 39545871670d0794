use bytes::Bytes;

use super::{error::Error, *};

/// A [`bytes::BufMut`] extension trait: write a frame, type byte included.
pub trait WriteFrame<F> {
    fn put_frame(&mut self, frame: &F);
}

/// A [`bytes::BufMut`] extension trait for data-bearing frames: write the
/// frame header and its data.
pub trait WriteDataFrame<F> {
    fn put_data_frame(&mut self, frame: &F, data: &[u8]);
}

fn complete<'a, T>(
    frame_type: FrameType,
    input: &'a [u8],
    result: nom::IResult<&'a [u8], T>,
) -> Result<(&'a [u8], T), Error> {
    result.map_err(|e| match e {
        nom::Err::Incomplete(_) => {
            Error::IncompleteFrame(frame_type, format!("frame needs more data: {input:?}"))
        }
        _ => Error::InvalidFrame(frame_type, format!("malformed frame: {input:?}")),
    })
}

/// Parse one frame at the start of `payload`, returning the bytes consumed,
/// the frame, and its type.
pub fn be_frame(payload: &Bytes, epoch: Epoch) -> Result<(usize, Frame, FrameType), Error> {
    let input = &payload[..];
    let (remain, frame_type) = be_frame_type(input).map_err(|e| match e {
        nom::Err::Error(e) => e,
        _ => Error::IncompleteType(format!("Incomplete frame type from input: {input:?}")),
    })?;
    if !frame_type.belongs_to(epoch) {
        return Err(Error::WrongType(frame_type, epoch));
    }

    let consumed_by_type = input.len() - remain.len();
    match frame_type {
        FrameType::Padding => Ok((consumed_by_type, Frame::Padding(PaddingFrame), frame_type)),
        FrameType::Ping => Ok((consumed_by_type, Frame::Ping(PingFrame), frame_type)),
        FrameType::HandshakeDone => Ok((
            consumed_by_type,
            Frame::HandshakeDone(HandshakeDoneFrame),
            frame_type,
        )),
        FrameType::Ack(ecn) => {
            let (rest, frame) = complete(frame_type, remain, ack::be_ack_frame(remain, ecn))?;
            Ok((input.len() - rest.len(), Frame::Ack(frame), frame_type))
        }
        FrameType::ResetStream => {
            let (rest, frame) =
                complete(frame_type, remain, reset_stream::be_reset_stream_frame(remain))?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::ResetStream(frame)),
                frame_type,
            ))
        }
        FrameType::StopSending => {
            let (rest, frame) =
                complete(frame_type, remain, stop_sending::be_stop_sending_frame(remain))?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::StopSending(frame)),
                frame_type,
            ))
        }
        FrameType::Crypto => {
            let (rest, frame) = complete(frame_type, remain, crypto::be_crypto_frame(remain))?;
            let offset = input.len() - rest.len();
            let length = usize::from(frame.length());
            if rest.len() < length {
                return Err(Error::IncompleteFrame(
                    frame_type,
                    "crypto frame data is shorter than its length field".to_string(),
                ));
            }
            let data = payload.slice(offset..offset + length);
            Ok((offset + length, Frame::Crypto(frame, data), frame_type))
        }
        FrameType::NewToken => {
            let (rest, frame) =
                complete(frame_type, remain, new_token::be_new_token_frame(remain))?;
            Ok((input.len() - rest.len(), Frame::NewToken(frame), frame_type))
        }
        FrameType::Stream(flag) => {
            let (rest, mut frame) =
                complete(frame_type, remain, stream::be_stream_frame(remain, flag))?;
            let offset = input.len() - rest.len();
            let length = match frame.explicit_length() {
                Some(length) => {
                    if rest.len() < length {
                        return Err(Error::IncompleteFrame(
                            frame_type,
                            "stream frame data is shorter than its length field".to_string(),
                        ));
                    }
                    length
                }
                // without a LEN bit the data extends to the end of the packet
                None => rest.len(),
            };
            frame
                .set_actual_length(length)
                .map_err(|reason| Error::InvalidFrame(frame_type, reason.to_string()))?;
            let data = payload.slice(offset..offset + length);
            Ok((offset + length, Frame::Stream(frame, data), frame_type))
        }
        FrameType::MaxData => {
            let (rest, frame) = complete(frame_type, remain, max_data::be_max_data_frame(remain))?;
            Ok((input.len() - rest.len(), Frame::MaxData(frame), frame_type))
        }
        FrameType::MaxStreamData => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                max_stream_data::be_max_stream_data_frame(remain),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::MaxStreamData(frame)),
                frame_type,
            ))
        }
        FrameType::MaxStreams(dir) => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                max_streams::be_max_streams_frame(remain, dir),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::MaxStreams(frame)),
                frame_type,
            ))
        }
        FrameType::DataBlocked => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                data_blocked::be_data_blocked_frame(remain),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::DataBlocked(frame),
                frame_type,
            ))
        }
        FrameType::StreamDataBlocked => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                stream_data_blocked::be_stream_data_blocked_frame(remain),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::StreamDataBlocked(frame)),
                frame_type,
            ))
        }
        FrameType::StreamsBlocked(dir) => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                streams_blocked::be_streams_blocked_frame(remain, dir),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::StreamCtl(StreamCtlFrame::StreamsBlocked(frame)),
                frame_type,
            ))
        }
        FrameType::NewConnectionId => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                new_connection_id::be_new_connection_id_frame(remain),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::NewConnectionId(frame),
                frame_type,
            ))
        }
        FrameType::RetireConnectionId => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                retire_connection_id::be_retire_connection_id_frame(remain),
            )?;
            Ok((
                input.len() - rest.len(),
                Frame::RetireConnectionId(frame),
                frame_type,
            ))
        }
        FrameType::PathChallenge => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                path_challenge::be_path_challenge_frame(remain),
            )?;
            Ok((input.len() - rest.len(), Frame::Challenge(frame), frame_type))
        }
        FrameType::PathResponse => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                path_response::be_path_response_frame(remain),
            )?;
            Ok((input.len() - rest.len(), Frame::Response(frame), frame_type))
        }
        FrameType::ConnectionClose(layer) => {
            let (rest, frame) = complete(
                frame_type,
                remain,
                connection_close::be_connection_close_frame(remain, layer),
            )?;
            Ok((input.len() - rest.len(), Frame::Close(frame), frame_type))
        }
    }
}
