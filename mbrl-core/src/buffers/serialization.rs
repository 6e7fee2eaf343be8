use crate::{
    buffers::replay_buffer::ReplayBuffer,
    env::Action,
    error::{Error, Result},
    ipc::{decode_tensor, encode_tensor, receive_packet, send_packet},
    transition::{Experience, Transition, TransitionId},
};
use bincode::{
    BorrowDecode, Decode, Encode,
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
};
use std::io::{Read, Write};

impl Encode for Transition {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> std::result::Result<(), EncodeError> {
        self.id().0.encode(encoder)?;
        encode_tensor(&self.state0, encoder)?;
        self.action0.encode(encoder)?;
        self.reward.encode(encoder)?;
        self.done.encode(encoder)?;
        encode_tensor(&self.state1, encoder)
    }
}

// TODO: decoded tensors always land on the cpu, the device should come in through the context
impl<C> Decode<C> for Transition {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let id = TransitionId(u64::decode(decoder)?);
        let state0 = decode_tensor(decoder)?;
        let action0 = Action::decode(decoder)?;
        let reward: Vec<f32> = Vec::decode(decoder)?;
        let done: Vec<bool> = Vec::decode(decoder)?;
        let state1 = decode_tensor(decoder)?;
        Ok(Transition::new(
            id,
            Experience::new(state0, action0, reward, done, state1),
        ))
    }
}

impl<'de, C> BorrowDecode<'de, C> for Transition {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        Transition::decode(decoder)
    }
}

impl Encode for ReplayBuffer {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> std::result::Result<(), EncodeError> {
        self.slots().encode(encoder)?;
        self.write_cursor().encode(encoder)?;
        self.next_id().encode(encoder)
    }
}

impl<C> Decode<C> for ReplayBuffer {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let slots: Vec<Option<Transition>> = Vec::decode(decoder)?;
        let cursor = usize::decode(decoder)?;
        let next_id = u64::decode(decoder)?;
        let capacity = slots.len();
        let count = slots.iter().filter(|slot| slot.is_some()).count();
        let cursor_in_range = cursor < capacity || (capacity == 0 && cursor == 0);
        let layout_ok = if count == capacity {
            true
        } else {
            cursor == count && slots[..count].iter().all(Option::is_some)
        };
        if !cursor_in_range || !layout_ok {
            return Err(DecodeError::OtherString(format!(
                "inconsistent replay buffer snapshot: {count} entries, capacity {capacity}, cursor {cursor}"
            )));
        }
        Ok(ReplayBuffer::from_parts(slots, cursor, count, next_id))
    }
}

impl<'de, C> BorrowDecode<'de, C> for ReplayBuffer {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        ReplayBuffer::decode(decoder)
    }
}

impl ReplayBuffer {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard()).map_err(Error::codec)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (buffer, _) =
            bincode::decode_from_slice(bytes, bincode::config::standard()).map_err(Error::codec)?;
        Ok(buffer)
    }

    /// Writes a length prefixed snapshot, the same framing the worker protocol uses.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        send_packet(writer, self)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        receive_packet(reader)
    }
}
