//! ArduCAM Mini (ArduChip + OV2640) ドライバ
//!
//! ArduChip は SPI でアクセスする CPLD で、センサーからの JPEG を内部 FIFO に
//! 溜めます。センサー本体 (OV2640) の設定は I2C (SCCB) で行います。
//! `embedded-hal` 1.0 のトレイトだけに依存するので、ESP-IDF の
//! `SpiBusDriver` / `PinDriver` / `I2cDriver` でもホストのテストダブルでも動きます。
//!
//! チップセレクトは `SpiDevice` に任せず `OutputPin` で自前制御します。
//! バースト読み出しの間 CS を保持し続ける必要があるためです。

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, Error as _, OutputPin};
use embedded_hal::i2c::{self, Error as _, I2c};
use embedded_hal::spi::{self, Error as _, SpiBus};
use log::{info, warn};

use super::fifo::{FifoError, FrameFifo, Resolution};
use super::ov2640_sequence::{
    jpeg_output_sequence, output_size_sequence, soft_reset_sequence, RegWrite, BANK_SENSOR,
    OV2640_I2C_ADDR, OV2640_PID, REG_BANK_SEL, REG_SENSOR_PIDH,
};

const ARDUCHIP_TEST1: u8 = 0x00;
const ARDUCHIP_FRAMES: u8 = 0x01;
const ARDUCHIP_FIFO: u8 = 0x04;
const ARDUCHIP_RESET: u8 = 0x07;
const ARDUCHIP_TRIG: u8 = 0x41;
const FIFO_SIZE1: u8 = 0x42;
const FIFO_SIZE2: u8 = 0x43;
const FIFO_SIZE3: u8 = 0x44;
const BURST_FIFO_READ: u8 = 0x3C;

const WRITE_FLAG: u8 = 0x80;
const FIFO_CLEAR_MASK: u8 = 0x01;
const FIFO_START_MASK: u8 = 0x02;
const CAP_DONE_MASK: u8 = 0x08;
const CPLD_RESET_ASSERT: u8 = 0x80;
const SPI_TEST_PATTERN: u8 = 0x55;

const RESET_SETTLE_MS: u32 = 100;

fn spi_error<E: spi::Error>(e: E) -> FifoError {
    FifoError::Spi(format!("{:?}", e.kind()))
}

fn pin_error<E: digital::Error>(e: E) -> FifoError {
    FifoError::ChipSelect(format!("{:?}", e.kind()))
}

fn i2c_error<E: i2c::Error>(e: E) -> FifoError {
    FifoError::I2c(format!("{:?}", e.kind()))
}

pub struct ArduChip<SPI, CS, I2C, D> {
    spi: SPI,
    cs: CS,
    i2c: I2C,
    delay: D,
}

impl<SPI, CS, I2C, D> ArduChip<SPI, CS, I2C, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(spi: SPI, cs: CS, i2c: I2C, delay: D) -> Self {
        Self {
            spi,
            cs,
            i2c,
            delay,
        }
    }

    pub fn release(self) -> (SPI, CS, I2C, D) {
        (self.spi, self.cs, self.i2c, self.delay)
    }

    fn with_selected<R>(
        &mut self,
        op: impl FnOnce(&mut SPI) -> Result<R, SPI::Error>,
    ) -> Result<R, FifoError> {
        self.cs.set_low().map_err(pin_error)?;
        let result = op(&mut self.spi).and_then(|value| self.spi.flush().map(|_| value));
        let deselected = self.cs.set_high().map_err(pin_error);
        let value = result.map_err(spi_error)?;
        deselected?;
        Ok(value)
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> Result<(), FifoError> {
        self.with_selected(|spi| spi.write(&[addr | WRITE_FLAG, value]))
    }

    fn read_reg(&mut self, addr: u8) -> Result<u8, FifoError> {
        self.with_selected(|spi| {
            let mut frame = [addr & !WRITE_FLAG, 0x00];
            spi.transfer_in_place(&mut frame)?;
            Ok(frame[1])
        })
    }

    fn write_sensor(&mut self, sequence: &[RegWrite]) -> Result<(), FifoError> {
        for reg in sequence {
            self.i2c
                .write(OV2640_I2C_ADDR, &[reg.reg, reg.value])
                .map_err(i2c_error)?;
        }
        Ok(())
    }
}

impl<SPI, CS, I2C, D> FrameFifo for ArduChip<SPI, CS, I2C, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    I2C: I2c,
    D: DelayNs,
{
    fn probe_sensor(&mut self) -> Result<bool, FifoError> {
        if let Err(e) = self.i2c.write(OV2640_I2C_ADDR, &[REG_BANK_SEL, BANK_SENSOR]) {
            return match e.kind() {
                i2c::ErrorKind::NoAcknowledge(_) => Ok(false),
                _ => Err(i2c_error(e)),
            };
        }

        let mut pid = [0u8];
        self.i2c
            .write_read(OV2640_I2C_ADDR, &[REG_SENSOR_PIDH], &mut pid)
            .map_err(i2c_error)?;
        if pid[0] != OV2640_PID {
            warn!("OV2640 以外のセンサーが応答しました: PID=0x{:02X}", pid[0]);
            return Ok(false);
        }
        Ok(true)
    }

    fn init(&mut self, resolution: Resolution) -> Result<(), FifoError> {
        // CPLD リセット
        self.write_reg(ARDUCHIP_RESET, CPLD_RESET_ASSERT)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.write_reg(ARDUCHIP_RESET, 0x00)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        self.write_reg(ARDUCHIP_TEST1, SPI_TEST_PATTERN)?;
        let read = self.read_reg(ARDUCHIP_TEST1)?;
        if read != SPI_TEST_PATTERN {
            return Err(FifoError::SpiCheckFailed {
                wrote: SPI_TEST_PATTERN,
                read,
            });
        }

        self.write_sensor(&soft_reset_sequence())?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.write_sensor(&jpeg_output_sequence())?;
        self.write_sensor(&output_size_sequence(resolution))?;

        // 1 トリガーで 1 フレームだけ取り込む
        self.write_reg(ARDUCHIP_FRAMES, 0x00)?;

        info!("ArduChip initialized: {}", resolution);
        Ok(())
    }

    fn start_capture(&mut self) -> Result<(), FifoError> {
        // flush → clear flag → start
        self.write_reg(ARDUCHIP_FIFO, FIFO_CLEAR_MASK)?;
        self.write_reg(ARDUCHIP_FIFO, FIFO_CLEAR_MASK)?;
        self.write_reg(ARDUCHIP_FIFO, FIFO_START_MASK)
    }

    fn capture_done(&mut self) -> Result<bool, FifoError> {
        Ok(self.read_reg(ARDUCHIP_TRIG)? & CAP_DONE_MASK != 0)
    }

    fn fifo_length(&mut self) -> Result<usize, FifoError> {
        let len1 = self.read_reg(FIFO_SIZE1)? as usize;
        let len2 = self.read_reg(FIFO_SIZE2)? as usize;
        let len3 = (self.read_reg(FIFO_SIZE3)? & 0x7F) as usize;
        Ok((len3 << 16) | (len2 << 8) | len1)
    }

    fn begin_burst(&mut self) -> Result<(), FifoError> {
        self.cs.set_low().map_err(pin_error)?;
        self.spi.write(&[BURST_FIFO_READ]).map_err(spi_error)
    }

    fn read_burst(&mut self, buf: &mut [u8]) -> Result<(), FifoError> {
        self.spi.read(buf).map_err(spi_error)
    }

    fn end_burst(&mut self) -> Result<(), FifoError> {
        let flushed = self.spi.flush().map_err(spi_error);
        self.cs.set_high().map_err(pin_error)?;
        flushed
    }
}
