use crate::{
    env::{Action, EnvKind, ExtraAttributes, Info, SnapShot, Space},
    ipc::{decode_tensor, encode_tensor},
};
use bincode::{
    BorrowDecode, Decode, Encode,
    de::{BorrowDecoder, Decoder},
    enc::Encoder,
    error::{DecodeError, EncodeError},
};
use candle_core::Tensor;

/// Sent once to a subprocess worker right after it connects.
#[derive(Debug, Clone, Encode, Decode)]
pub struct WorkerSetup<EB> {
    pub worker_id: usize,
    pub seed: u64,
    pub builder: EB,
}

#[derive(Debug, Clone, Encode, Decode)]
pub enum WorkerCommand {
    Step { action: Action },
    Reset,
    ResetTask,
    // no reply
    Render,
    GetSpaces,
    GetAgentCount,
    GetEnvKind,
    GetExtraAttributes,
    // no reply, the worker leaves its loop
    Close,
}

impl WorkerCommand {
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::Render | Self::Close)
    }
}

#[derive(Debug, Clone)]
pub enum WorkerReply {
    /// The environment was built and the worker is serving commands.
    Ready,
    /// The environment failed. The worker exits right after sending this.
    Failed {
        reason: String,
    },
    Step(SnapShot),
    Observation(Tensor),
    Spaces {
        observation_space: Space,
        action_space: Space,
    },
    AgentCount(usize),
    EnvKind(EnvKind),
    ExtraAttributes(ExtraAttributes),
}

impl WorkerReply {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Failed { .. } => "failed",
            Self::Step(_) => "step",
            Self::Observation(_) => "observation",
            Self::Spaces { .. } => "spaces",
            Self::AgentCount(_) => "agent count",
            Self::EnvKind(_) => "env kind",
            Self::ExtraAttributes(_) => "extra attributes",
        }
    }
}

impl Encode for SnapShot {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        encode_tensor(&self.state, encoder)?;
        self.reward.encode(encoder)?;
        self.done.encode(encoder)?;
        self.info.encode(encoder)
    }
}

impl<C> Decode<C> for SnapShot {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self {
            state: decode_tensor(decoder)?,
            reward: Vec::decode(decoder)?,
            done: Vec::decode(decoder)?,
            info: Info::decode(decoder)?,
        })
    }
}

impl<'de, C> BorrowDecode<'de, C> for SnapShot {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        SnapShot::decode(decoder)
    }
}

impl Encode for WorkerReply {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        match self {
            Self::Ready => 0u32.encode(encoder),
            Self::Failed { reason } => {
                1u32.encode(encoder)?;
                reason.encode(encoder)
            }
            Self::Step(snapshot) => {
                2u32.encode(encoder)?;
                snapshot.encode(encoder)
            }
            Self::Observation(observation) => {
                3u32.encode(encoder)?;
                encode_tensor(observation, encoder)
            }
            Self::Spaces {
                observation_space,
                action_space,
            } => {
                4u32.encode(encoder)?;
                observation_space.encode(encoder)?;
                action_space.encode(encoder)
            }
            Self::AgentCount(count) => {
                5u32.encode(encoder)?;
                count.encode(encoder)
            }
            Self::EnvKind(kind) => {
                6u32.encode(encoder)?;
                kind.encode(encoder)
            }
            Self::ExtraAttributes(attributes) => {
                7u32.encode(encoder)?;
                attributes.encode(encoder)
            }
        }
    }
}

impl<C> Decode<C> for WorkerReply {
    fn decode<D: Decoder<Context = C>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let reply = match u32::decode(decoder)? {
            0 => Self::Ready,
            1 => Self::Failed {
                reason: String::decode(decoder)?,
            },
            2 => Self::Step(SnapShot::decode(decoder)?),
            3 => Self::Observation(decode_tensor(decoder)?),
            4 => Self::Spaces {
                observation_space: Space::decode(decoder)?,
                action_space: Space::decode(decoder)?,
            },
            5 => Self::AgentCount(usize::decode(decoder)?),
            6 => Self::EnvKind(EnvKind::decode(decoder)?),
            7 => Self::ExtraAttributes(ExtraAttributes::decode(decoder)?),
            tag => {
                return Err(DecodeError::OtherString(format!(
                    "unknown worker reply tag {tag}"
                )));
            }
        };
        Ok(reply)
    }
}

impl<'de, C> BorrowDecode<'de, C> for WorkerReply {
    fn borrow_decode<D: BorrowDecoder<'de, Context = C>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        WorkerReply::decode(decoder)
    }
}

#[cfg(test)]
mod test {
    use super::{WorkerCommand, WorkerReply, WorkerSetup};
    use crate::{
        env::{Action, Info, SnapShot, Space},
        ipc::{receive_packet, send_packet},
    };
    use candle_core::{Device, Tensor};
    use std::io::Cursor;

    #[test]
    fn step_reply_keeps_auto_reset_information() {
        let mut info = Info {
            terminal_observation: Some(Tensor::new(&[[9f32]], &Device::Cpu).unwrap()),
            ..Default::default()
        };
        info.values.insert("distance".into(), 0.5);
        let reply = WorkerReply::Step(SnapShot {
            state: Tensor::new(&[[0f32]], &Device::Cpu).unwrap(),
            reward: vec![1.],
            done: vec![true],
            info,
        });
        let mut wire = vec![];
        send_packet(&mut wire, &reply).unwrap();
        let WorkerReply::Step(snapshot) = receive_packet(&mut Cursor::new(wire)).unwrap() else {
            panic!("expected a step reply");
        };
        assert_eq!(snapshot.done, vec![true]);
        assert_eq!(snapshot.state.to_vec2::<f32>().unwrap(), vec![vec![0.]]);
        let terminal = snapshot.info.terminal_observation.unwrap();
        assert_eq!(terminal.to_vec2::<f32>().unwrap(), vec![vec![9.]]);
        assert_eq!(snapshot.info.values.get("distance"), Some(&0.5));
    }

    #[test]
    fn commands_and_setup_travel_in_order() {
        let mut wire = vec![];
        let setup = WorkerSetup {
            worker_id: 2,
            seed: 11,
            builder: String::from("countdown"),
        };
        send_packet(&mut wire, &setup).unwrap();
        send_packet(
            &mut wire,
            &WorkerCommand::Step {
                action: Action::Discrete(vec![1, 0]),
            },
        )
        .unwrap();
        send_packet(&mut wire, &WorkerCommand::Close).unwrap();
        let mut conn = Cursor::new(wire);
        let setup: WorkerSetup<String> = receive_packet(&mut conn).unwrap();
        assert_eq!((setup.worker_id, setup.seed), (2, 11));
        assert_eq!(setup.builder, "countdown");
        let step: WorkerCommand = receive_packet(&mut conn).unwrap();
        assert!(matches!(
            step,
            WorkerCommand::Step { action: Action::Discrete(ref choices) } if choices == &vec![1, 0]
        ));
        let close: WorkerCommand = receive_packet(&mut conn).unwrap();
        assert!(!close.expects_reply());
    }

    #[test]
    fn spaces_reply_roundtrips() {
        let reply = WorkerReply::Spaces {
            observation_space: Space::continuous_from_dims(vec![3]),
            action_space: Space::Discrete(4),
        };
        let mut wire = vec![];
        send_packet(&mut wire, &reply).unwrap();
        let decoded: WorkerReply = receive_packet(&mut Cursor::new(wire)).unwrap();
        let WorkerReply::Spaces {
            observation_space,
            action_space,
        } = decoded
        else {
            panic!("expected spaces");
        };
        assert_eq!(observation_space, Space::continuous_from_dims(vec![3]));
        assert_eq!(action_space, Space::Discrete(4));
    }
}
