use crate::{
    env::{Action, Info},
    error::{Error, Result},
};
use bincode::{
    BorrowDecode, Decode, Encode,
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
};
use candle_core::{DType, Device, Tensor};
use std::{
    collections::BTreeMap,
    io::{Read, Write},
};

// Custom low level protocol to send data
pub fn send_packet<W: Write, P: Encode>(conn: &mut W, packet: &P) -> Result<()> {
    let payload = bincode::encode_to_vec(packet, bincode::config::standard()).map_err(Error::codec)?;
    let payload_len = u32::try_from(payload.len())
        .map_err(Error::codec)?
        .to_be_bytes();
    conn.write_all(&payload_len)?;
    conn.write_all(&payload)?;
    conn.flush()?;
    Ok(())
}

// Custom low level protocol to receive data
pub fn receive_packet<R: Read, P: Decode<()>>(conn: &mut R) -> Result<P> {
    let mut content_len = [0u8; 4];
    conn.read_exact(&mut content_len)?;
    let len = u32::from_be_bytes(content_len);
    let mut buffer = vec![0u8; len as usize];
    conn.read_exact(&mut buffer)?;
    let (packet, _): (P, _) =
        bincode::decode_from_slice(&buffer, bincode::config::standard()).map_err(Error::codec)?;
    Ok(packet)
}

#[derive(Encode, Decode)]
struct WireTensor {
    dims: Vec<usize>,
    data: Vec<f32>,
}

// Tensors travel as f32 and come back on the cpu
pub(crate) fn encode_tensor<E: Encoder>(
    tensor: &Tensor,
    encoder: &mut E,
) -> std::result::Result<(), EncodeError> {
    let data = tensor
        .flatten_all()
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(|err| EncodeError::OtherString(err.to_string()))?;
    let wire = WireTensor {
        dims: tensor.dims().to_vec(),
        data,
    };
    wire.encode(encoder)
}

pub(crate) fn decode_tensor<C, D: Decoder<Context = C>>(
    decoder: &mut D,
) -> std::result::Result<Tensor, DecodeError> {
    let WireTensor { dims, data } = WireTensor::decode(decoder)?;
    Tensor::from_vec(data, dims, &Device::Cpu)
        .map_err(|err| DecodeError::OtherString(err.to_string()))
}

impl Encode for Action {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> std::result::Result<(), EncodeError> {
        match self {
            Self::Discrete(choices) => {
                0u32.encode(encoder)?;
                choices.encode(encoder)
            }
            Self::Continuous(action) => {
                1u32.encode(encoder)?;
                encode_tensor(action, encoder)
            }
        }
    }
}

impl<C> Decode<C> for Action {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        match u32::decode(decoder)? {
            0 => Ok(Self::Discrete(Vec::decode(decoder)?)),
            1 => Ok(Self::Continuous(decode_tensor(decoder)?)),
            tag => Err(DecodeError::OtherString(format!("unknown action tag {tag}"))),
        }
    }
}

impl<'de, C> BorrowDecode<'de, C> for Action {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        Action::decode(decoder)
    }
}

impl Encode for Info {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> std::result::Result<(), EncodeError> {
        match &self.terminal_observation {
            None => 0u32.encode(encoder)?,
            Some(terminal_observation) => {
                1u32.encode(encoder)?;
                encode_tensor(terminal_observation, encoder)?;
            }
        }
        self.values.encode(encoder)
    }
}

impl<C> Decode<C> for Info {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let terminal_observation = match u32::decode(decoder)? {
            0 => None,
            1 => Some(decode_tensor(decoder)?),
            tag => {
                return Err(DecodeError::OtherString(format!(
                    "unknown terminal observation tag {tag}"
                )));
            }
        };
        let values: BTreeMap<String, f32> = BTreeMap::decode(decoder)?;
        Ok(Self {
            terminal_observation,
            values,
        })
    }
}

impl<'de, C> BorrowDecode<'de, C> for Info {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> std::result::Result<Self, DecodeError> {
        Info::decode(decoder)
    }
}
