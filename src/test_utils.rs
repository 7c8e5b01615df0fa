//! Test doubles and property-test generators

/// Scripted stand-ins for the keyboard and the external toolchain
pub mod mock {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::core::bootloader::{BootloaderEntry, SequenceOutcome};
    use crate::core::features::McuFamily;
    use crate::core::flash::{CommandOutput, CommandRunner, Invocation};
    use crate::core::protocol::{
        encode_response, Command, DeviceSession, StatusCode, Transport, BLOCK_SIZE, PROTOCOL_ID,
        TERMINATOR,
    };
    use crate::error::{FlashError, SequencerError, TransportError};

    /// How the scripted device reacts to one command
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// Answer with a well-formed response block
        Frame(StatusCode, String),
        /// Answer with these exact bytes
        Raw(Vec<u8>),
        /// Never answer
        Silence,
        /// Fail the write with a disconnect
        DisconnectOnWrite,
        /// Accept the write, then fail the read with a disconnect
        DisconnectOnRead,
    }

    /// A scripted keyboard
    #[derive(Debug, Clone, Default)]
    pub struct MockDevice {
        replies: HashMap<String, Reply>,
    }

    impl MockDevice {
        /// A device that rejects every command
        pub fn new() -> Self {
            Self::default()
        }

        /// A device running the Field Kit firmware, locked to `side`
        pub fn field_kit(side: &str) -> Self {
            Self::new()
                .reply(
                    Command::Status,
                    Reply::Frame(StatusCode::Ok, "Field Kit active".to_string()),
                )
                .reply(
                    Command::SideInfo,
                    Reply::Frame(StatusCode::Info, format!("SIDE={side}|SPLIT=true")),
                )
                .reply(
                    Command::FirmwareInfo,
                    Reply::Frame(
                        StatusCode::Info,
                        "KEYBOARD=kb|MCU=rp2040|PROTOCOL=serial".to_string(),
                    ),
                )
                .reply(Command::Bootloader, Reply::DisconnectOnRead)
        }

        /// Script the reply to `command`
        pub fn reply(mut self, command: Command, reply: Reply) -> Self {
            self.replies.insert(command.as_str().to_string(), reply);
            self
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        opens: usize,
        closes: usize,
        sent: Vec<String>,
    }

    /// Transport handing out sessions to a [`MockDevice`]
    #[derive(Debug, Clone)]
    pub struct MockTransport {
        device: Option<MockDevice>,
        state: Rc<RefCell<MockState>>,
    }

    impl MockTransport {
        /// A transport with `device` attached
        pub fn new(device: MockDevice) -> Self {
            Self {
                device: Some(device),
                state: Rc::default(),
            }
        }

        /// A transport with nothing attached
        pub fn unplugged() -> Self {
            Self {
                device: None,
                state: Rc::default(),
            }
        }

        /// Number of sessions opened
        pub fn opens(&self) -> usize {
            self.state.borrow().opens
        }

        /// Number of sessions closed
        pub fn closes(&self) -> usize {
            self.state.borrow().closes
        }

        /// Commands received so far, in order
        pub fn sent_commands(&self) -> Vec<String> {
            self.state.borrow().sent.clone()
        }
    }

    impl Transport for MockTransport {
        type Session = MockSession;

        fn open(&self) -> Result<MockSession, TransportError> {
            let device = self.device.clone().ok_or(TransportError::NotFound {
                vendor_id: 0xFEED,
                product_id: 0x0000,
            })?;
            self.state.borrow_mut().opens += 1;
            Ok(MockSession {
                device,
                pending: None,
                state: Rc::clone(&self.state),
            })
        }
    }

    /// One open session on a [`MockDevice`]
    #[derive(Debug)]
    pub struct MockSession {
        device: MockDevice,
        pending: Option<Reply>,
        state: Rc<RefCell<MockState>>,
    }

    impl DeviceSession for MockSession {
        fn write_frame(&mut self, frame: &[u8; BLOCK_SIZE]) -> Result<(), TransportError> {
            assert_eq!(&frame[..2], &PROTOCOL_ID, "request must carry the protocol ID");
            let body = &frame[2..];
            let end = body.iter().position(|&b| b == TERMINATOR).unwrap_or(body.len());
            let command = String::from_utf8_lossy(&body[..end]).into_owned();
            self.state.borrow_mut().sent.push(command.clone());

            let reply = self.device.replies.get(&command).cloned().unwrap_or(Reply::Frame(
                StatusCode::Error,
                "Unknown command".to_string(),
            ));
            if let Reply::DisconnectOnWrite = reply {
                return Err(TransportError::Disconnected {
                    message: "device reset during write".to_string(),
                });
            }
            self.pending = Some(reply);
            Ok(())
        }

        fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
            match self.pending.clone() {
                Some(Reply::Frame(status, message)) => {
                    self.pending = None;
                    Ok(Some(encode_response(status, &message).to_vec()))
                }
                Some(Reply::Raw(bytes)) => {
                    self.pending = None;
                    Ok(Some(bytes))
                }
                Some(Reply::DisconnectOnRead) => Err(TransportError::Disconnected {
                    message: "device reset during read".to_string(),
                }),
                Some(Reply::Silence | Reply::DisconnectOnWrite) | None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    impl Drop for MockSession {
        fn drop(&mut self) {
            self.state.borrow_mut().closes += 1;
        }
    }

    /// Command runner that records invocations and replays exit codes
    #[derive(Debug, Default)]
    pub struct RecordingRunner {
        /// Every invocation, in order
        pub invocations: Vec<Invocation>,
        failures: HashMap<String, i32>,
    }

    impl RecordingRunner {
        /// A runner where every command succeeds
        pub fn new() -> Self {
            Self::default()
        }

        /// Make invocations whose rendering contains `needle` exit with `code`
        pub fn fail_on(mut self, needle: &str, code: i32) -> Self {
            self.failures.insert(needle.to_string(), code);
            self
        }

        /// Rendered invocations, in order
        pub fn rendered(&self) -> Vec<String> {
            self.invocations.iter().map(ToString::to_string).collect()
        }
    }

    impl CommandRunner for RecordingRunner {
        fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput, FlashError> {
            self.invocations.push(invocation.clone());
            let rendered = invocation.to_string();
            let exit_code = self
                .failures
                .iter()
                .find(|(needle, _)| rendered.contains(needle.as_str()))
                .map_or(0, |(_, code)| *code);
            Ok(CommandOutput {
                exit_code,
                output: format!("ran {rendered}"),
            })
        }
    }

    /// Bootloader step that records which families it was asked to enter
    #[derive(Debug)]
    pub struct ScriptedBootloader {
        /// Families requested, in order
        pub entered: Vec<McuFamily>,
        outcome: Result<SequenceOutcome, SequencerError>,
    }

    impl ScriptedBootloader {
        /// Always report `outcome`
        pub fn new(outcome: Result<SequenceOutcome, SequencerError>) -> Self {
            Self {
                entered: Vec::new(),
                outcome,
            }
        }

        /// Always report ready
        pub fn ready() -> Self {
            Self::new(Ok(SequenceOutcome::Ready {
                manual_action_required: false,
            }))
        }
    }

    impl BootloaderEntry for ScriptedBootloader {
        fn enter(&mut self, family: McuFamily) -> Result<SequenceOutcome, SequencerError> {
            self.entered.push(family);
            self.outcome.clone()
        }
    }
}

/// Generators for proptest
pub mod generators {
    use proptest::prelude::*;

    use crate::core::side::{RequestedSide, Side};

    /// Either physical half
    pub fn side() -> impl Strategy<Value = Side> {
        prop_oneof![Just(Side::Left), Just(Side::Right)]
    }

    /// Any side a user can ask for
    pub fn requested_side() -> impl Strategy<Value = RequestedSide> {
        prop_oneof![
            Just(RequestedSide::Left),
            Just(RequestedSide::Right),
            Just(RequestedSide::Auto),
        ]
    }
}
