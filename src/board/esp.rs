//! GPIO implementations of the link and sensor bus traits
//!
//! Generic over embedded-hal pins so the same code drives any ESP32-S3
//! pin assignment. Interrupt-driven waits become embedded-hal-async edge
//! waits, and the sensor wake-up timer becomes an embassy timer.

use crate::comm::traits::{BusError, Direction, Edge, LinkPins, Wake};
use crate::config::link::CLOCK_TIMEOUT_MS;
use crate::config::protocol::BSL_PASSWORD_LEN;
use crate::config::sensor::{BIT_PERIOD_US, CHANNELS, ROLLOVER_MS, SETTLE_US};
use crate::dispatcher::traits::{Flash, FlashError, HardwareId, SupplyMonitor};
use crate::stm::traits::{Channel, SensorBus, SensorEvent};
use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

/// Two-wire link to the CP
///
/// `sda` must be configured open-drain with its input enabled, so driving
/// it high releases the line.
pub struct GpioLinkPins<Sda, Scl, Int>
where
    Sda: InputPin + OutputPin + Wait,
    Scl: InputPin + Wait,
    Int: Wait,
{
    sda: Sda,
    scl: Scl,
    int: Int,
    direction: Direction,
    level: bool,
}

impl<Sda, Scl, Int> GpioLinkPins<Sda, Scl, Int>
where
    Sda: InputPin + OutputPin + Wait,
    Scl: InputPin + Wait,
    Int: Wait,
{
    pub fn new(sda: Sda, scl: Scl, int: Int) -> Self {
        let mut pins = Self {
            sda,
            scl,
            int,
            direction: Direction::Input,
            level: true,
        };
        let _ = pins.sda.set_high();
        pins
    }

    fn drive(&mut self) {
        let high = self.direction == Direction::Input || self.level;
        let _ = if high {
            self.sda.set_high()
        } else {
            self.sda.set_low()
        };
    }
}

impl<Sda, Scl, Int> LinkPins for GpioLinkPins<Sda, Scl, Int>
where
    Sda: InputPin + OutputPin + Wait,
    Scl: InputPin + Wait,
    Int: Wait,
{
    async fn sleep_until_wake(&mut self) -> Wake {
        loop {
            // The CP raises INT to signal an event
            match select(self.sda.wait_for_falling_edge(), self.int.wait_for_rising_edge()).await {
                Either::First(_) => {
                    // Data falling with the clock low is a bit, not a start
                    if self.scl.is_high().unwrap_or(false) {
                        return Wake::StartCondition;
                    }
                }
                Either::Second(_) => return Wake::Event,
            }
        }
    }

    async fn wait_for_clock(&mut self, edge: Edge) -> Result<(), BusError> {
        let timeout = Duration::from_millis(CLOCK_TIMEOUT_MS);
        let result = match edge {
            Edge::Rising => with_timeout(timeout, self.scl.wait_for_rising_edge()).await,
            Edge::Falling => with_timeout(timeout, self.scl.wait_for_falling_edge()).await,
        };
        match result {
            Ok(Ok(())) => Ok(()),
            _ => Err(BusError::ClockTimeout),
        }
    }

    fn set_data_direction(&mut self, direction: Direction) {
        self.direction = direction;
        self.drive();
    }

    fn set_data(&mut self, high: bool) {
        self.level = high;
        if self.direction == Direction::Output {
            self.drive();
        }
    }

    fn data_is_high(&mut self) -> bool {
        self.sda.is_high().unwrap_or(true)
    }
}

/// Excitation outputs and serial inputs, index 0 is channel 1
pub struct SensorPins<Ex, Rx> {
    pub excite: [Ex; CHANNELS],
    pub rx: [Rx; CHANNELS],
}

/// Sensor channels with a timer-driven software UART
pub struct GpioSensorBus<Ex, Rx>
where
    Ex: OutputPin,
    Rx: InputPin + Wait,
{
    excite: [Ex; CHANNELS],
    rx: [Rx; CHANNELS],
    armed: Option<Channel>,
    next_tick: Instant,
}

impl<Ex, Rx> GpioSensorBus<Ex, Rx>
where
    Ex: OutputPin,
    Rx: InputPin + Wait,
{
    pub fn new(pins: SensorPins<Ex, Rx>) -> Self {
        let mut bus = Self {
            excite: pins.excite,
            rx: pins.rx,
            armed: None,
            next_tick: Instant::now(),
        };
        for pin in bus.excite.iter_mut() {
            let _ = pin.set_low();
        }
        bus
    }
}

impl<Ex, Rx> SensorBus for GpioSensorBus<Ex, Rx>
where
    Ex: OutputPin,
    Rx: InputPin + Wait,
{
    fn set_excitation(&mut self, channel: Channel, on: bool) {
        let pin = &mut self.excite[channel.index()];
        let _ = if on { pin.set_high() } else { pin.set_low() };
    }

    fn set_rx_interrupt(&mut self, channel: Channel, enabled: bool) {
        if enabled {
            self.armed = Some(channel);
        } else if self.armed == Some(channel) {
            self.armed = None;
        }
    }

    async fn settle(&mut self) {
        Timer::after(Duration::from_micros(SETTLE_US)).await;
    }

    async fn sleep(&mut self) -> SensorEvent {
        let rollover = Timer::after(Duration::from_millis(ROLLOVER_MS));
        let Some(channel) = self.armed else {
            rollover.await;
            return SensorEvent::Rollover;
        };

        match select(self.rx[channel.index()].wait_for_falling_edge(), rollover).await {
            Either::First(_) => {
                // First sample lands mid-way through data bit 0
                self.next_tick =
                    Instant::now() + Duration::from_micros(BIT_PERIOD_US + BIT_PERIOD_US / 2);
                SensorEvent::StartBit
            }
            Either::Second(_) => SensorEvent::Rollover,
        }
    }

    async fn wait_bit_tick(&mut self) {
        Timer::at(self.next_tick).await;
        self.next_tick += Duration::from_micros(BIT_PERIOD_US);
    }

    fn rx_is_high(&mut self, channel: Channel) -> bool {
        self.rx[channel.index()].is_high().unwrap_or(true)
    }
}

/// Identity store backed by the eFuse MAC
///
/// The hardware ID is the base MAC address padded to eight bytes. eFuses
/// cannot be rewritten, so setting a serial number always fails.
pub struct EfuseFlash {
    id: HardwareId,
}

impl EfuseFlash {
    pub fn new(mac: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&mac);
        Self {
            id: HardwareId::from_bytes(&bytes),
        }
    }
}

impl Flash for EfuseFlash {
    fn hardware_id(&mut self) -> HardwareId {
        self.id
    }

    fn store_hardware_id(&mut self, _id: &HardwareId) -> Result<(), FlashError> {
        Err(FlashError::ReadOnly)
    }

    fn bsl_password(&mut self) -> [u8; BSL_PASSWORD_LEN] {
        // Blank, as from erased flash
        [0xFF; BSL_PASSWORD_LEN]
    }
}

/// Supply monitor for boards without a divider on an ADC pin
pub struct NominalSupply(pub u16);

impl SupplyMonitor for NominalSupply {
    fn supply_voltage(&mut self) -> u16 {
        self.0
    }
}
