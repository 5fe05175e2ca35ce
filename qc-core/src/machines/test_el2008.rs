//! EL2008 test rig: eight digital outputs with manual and automatic sequencing

use serde::{Deserialize, Serialize};

use super::MachineController;
use crate::constants::ids::{TEST_EL2008_MACHINE, VENDOR_QITECH};
use crate::error::{ControlError, Result};
use crate::mutation::MutationTransport;
use crate::namespace::{EventTable, MachineNamespace};
use qc_protocol::MachineIdentification;

pub const LED_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Manual,
    Home,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Stopped,
    Running,
}

/// Full state snapshot pushed as `StateEvent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub led_on: [bool; LED_COUNT],
    pub mode: Mode,
    pub machine_state: MachineState,
    pub automatic_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value")]
pub enum Mutation {
    SetLed { index: usize, on: bool },
    SetAllLeds { on: bool },
    SetMode { mode: Mode },
    Start,
    Stop,
    Reset,
    SetAutomaticDelay { delay_ms: u64 },
}

#[derive(Debug)]
pub struct TestEl2008Machine;

impl MachineNamespace for TestEl2008Machine {
    type State = StateEvent;
    type Mutation = Mutation;

    const MACHINE_IDENTIFICATION: MachineIdentification =
        MachineIdentification::new(VENDOR_QITECH, TEST_EL2008_MACHINE);

    const SLUG: &'static str = "testel2008machine";

    fn event_table() -> EventTable<StateEvent> {
        EventTable::new().snapshot("StateEvent")
    }
}

pub type TestEl2008Controller<X> = MachineController<TestEl2008Machine, X>;

impl<X: MutationTransport> MachineController<TestEl2008Machine, X> {
    pub fn set_led(&mut self, index: usize, on: bool) -> Result<u64> {
        if index >= LED_COUNT {
            return Err(ControlError::InvalidAction(format!(
                "LED index {index} out of range 0..{LED_COUNT}"
            )));
        }
        self.mutate(Mutation::SetLed { index, on }, |s| s.led_on[index] = on)
    }

    pub fn set_all_leds(&mut self, on: bool) -> Result<u64> {
        self.mutate(Mutation::SetAllLeds { on }, |s| s.led_on = [on; LED_COUNT])
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<u64> {
        self.mutate(Mutation::SetMode { mode }, |s| s.mode = mode)
    }

    pub fn start(&mut self) -> Result<u64> {
        self.mutate(Mutation::Start, |s| s.machine_state = MachineState::Running)
    }

    pub fn stop(&mut self) -> Result<u64> {
        self.mutate(Mutation::Stop, |s| s.machine_state = MachineState::Stopped)
    }

    /// Stop and switch every output off
    pub fn reset(&mut self) -> Result<u64> {
        self.mutate(Mutation::Reset, |s| {
            s.machine_state = MachineState::Stopped;
            s.led_on = [false; LED_COUNT];
        })
    }

    pub fn set_automatic_delay(&mut self, delay_ms: u64) -> Result<u64> {
        self.mutate(Mutation::SetAutomaticDelay { delay_ms }, |s| {
            s.automatic_delay_ms = delay_ms
        })
    }
}
