#![no_std]
#![no_main]

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use esp_backtrace as _;
use esp_hal::gpio::{DriveMode, Flex, Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::timer::timg::TimerGroup;
use sp_stm_firmware::app::StmBoard;
use sp_stm_firmware::board::{EfuseFlash, GpioLinkPins, GpioSensorBus, NominalSupply, SensorPins};
use sp_stm_firmware::comm::CommLink;
use sp_stm_firmware::dispatcher::Core;
use static_cell::StaticCell;

/// Supply reported until the board grows a measurement divider
const NOMINAL_SUPPLY_CENTIVOLTS: u16 = 330;

type LinkPinsImpl = GpioLinkPins<Flex<'static>, Input<'static>, Input<'static>>;
type SensorBusImpl = GpioSensorBus<Output<'static>, Input<'static>>;
type SpCore = Core<LinkPinsImpl, StmBoard<SensorBusImpl>, EfuseFlash, NominalSupply>;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Data line is open-drain with the CP's pull-up
    let mut sda = Flex::new(peripherals.GPIO4);
    sda.apply_output_config(&OutputConfig::default().with_drive_mode(DriveMode::OpenDrain));
    sda.apply_input_config(&InputConfig::default().with_pull(Pull::Up));
    sda.set_input_enable(true);
    sda.set_output_enable(true);
    sda.set_high();

    let scl = Input::new(peripherals.GPIO5, InputConfig::default().with_pull(Pull::Up));
    let int = Input::new(peripherals.GPIO6, InputConfig::default().with_pull(Pull::Up));
    let link = CommLink::new(GpioLinkPins::new(sda, scl, int));

    let sensor_pins = SensorPins {
        excite: [
            Output::new(peripherals.GPIO10, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO11, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO12, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default()),
        ],
        rx: [
            Input::new(peripherals.GPIO14, InputConfig::default().with_pull(Pull::Up)),
            Input::new(peripherals.GPIO15, InputConfig::default().with_pull(Pull::Up)),
            Input::new(peripherals.GPIO16, InputConfig::default().with_pull(Pull::Up)),
            Input::new(peripherals.GPIO17, InputConfig::default().with_pull(Pull::Up)),
        ],
    };
    let board = StmBoard::new(GpioSensorBus::new(sensor_pins));

    let mac = esp_hal::efuse::Efuse::read_base_mac_address();
    let core = Core::new(
        link,
        board,
        EfuseFlash::new(mac),
        NominalSupply(NOMINAL_SUPPLY_CENTIVOLTS),
    );

    log::info!("SP-STM starting");

    // Create and run the embassy executor
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(core_task(core));
    })
}

/// Task that serves the CP for the life of the board
#[embassy_executor::task]
async fn core_task(mut core: SpCore) {
    core.run().await;
}
