use ecu_core::bench::{BenchExecutor, BenchOutcome};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use heapless::String;

use super::{FirmwareEngine, RESYNC_REQUESTS, TELEMETRY};
use crate::console::{self, LineAssembler, RESPONSE_CAPACITY};
use crate::telemetry::FirmwareInstant;

const CONSOLE_UART_BUFFER_SIZE: usize = 256;
const CONSOLE_UART_BAUD: u32 = 115_200;
const BANNER: &str = "ecu bench console; type help\r\n> ";

static mut UART_TX_BUFFER: [u8; CONSOLE_UART_BUFFER_SIZE] = [0; CONSOLE_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; CONSOLE_UART_BUFFER_SIZE] = [0; CONSOLE_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    engine: &'static FirmwareEngine,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize console UART")
    };
    let (mut uart_tx, mut uart_rx) = uart.split();

    let mut bench = BenchExecutor::new(engine);
    let mut lines = LineAssembler::new();
    let mut response: String<RESPONSE_CAPACITY> = String::new();
    let mut ingress = [0u8; 32];

    if uart_tx.write_all(BANNER.as_bytes()).await.is_err() {
        defmt::warn!("console: UART write error");
    }

    loop {
        let count = match uart_rx.read(&mut ingress).await {
            Ok(count) => count,
            Err(_) => {
                defmt::warn!("console: UART read error");
                Timer::after(Duration::from_millis(5)).await;
                continue;
            }
        };

        for &byte in &ingress[..count] {
            response.clear();
            let Some(outcome) =
                lines.ingest(byte, |line| console::respond(&mut bench, line, &mut response))
            else {
                continue;
            };
            record(outcome);

            if uart_tx.write_all(response.as_bytes()).await.is_err() {
                defmt::warn!("console: UART write error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    }
}

fn record(outcome: Option<BenchOutcome>) {
    let now = FirmwareInstant::now();
    match outcome {
        Some(BenchOutcome::Actuated(bench)) => TELEMETRY.record_bench(bench, now),
        Some(BenchOutcome::Resync(width, report)) => {
            TELEMETRY.record_resync(width, report, now);
            if report.is_deferred() {
                RESYNC_REQUESTS.signal(width);
            }
        }
        Some(BenchOutcome::Stopped) => TELEMETRY.record_stop(now),
        Some(BenchOutcome::Status | BenchOutcome::Help) | None => {}
    }
}
