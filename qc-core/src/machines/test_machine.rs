//! Minimal test rig with four LEDs on an EL2004

use serde::{Deserialize, Serialize};

use super::MachineController;
use crate::constants::ids::{TEST_MACHINE, VENDOR_QITECH};
use crate::error::{ControlError, Result};
use crate::mutation::MutationTransport;
use crate::namespace::{EventTable, MachineNamespace};
use qc_protocol::MachineIdentification;

pub const LED_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub led_on: [bool; LED_COUNT],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value")]
pub enum Mutation {
    SetLed { index: usize, on: bool },
    SetAllLeds { on: bool },
}

#[derive(Debug)]
pub struct TestMachine;

impl MachineNamespace for TestMachine {
    type State = StateEvent;
    type Mutation = Mutation;

    const MACHINE_IDENTIFICATION: MachineIdentification =
        MachineIdentification::new(VENDOR_QITECH, TEST_MACHINE);

    const SLUG: &'static str = "testmachine";

    fn event_table() -> EventTable<StateEvent> {
        EventTable::new().snapshot("StateEvent")
    }
}

pub type TestMachineController<X> = MachineController<TestMachine, X>;

impl<X: MutationTransport> MachineController<TestMachine, X> {
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
}
