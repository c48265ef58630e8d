use super::fifo::Resolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    pub reg: u8,
    pub value: u8,
}

const fn w(reg: u8, value: u8) -> RegWrite {
    RegWrite { reg, value }
}

/// OV2640 の 7bit I2C (SCCB) アドレス
pub const OV2640_I2C_ADDR: u8 = 0x30;
pub const OV2640_PID: u8 = 0x26;

pub const REG_BANK_SEL: u8 = 0xFF;
pub const REG_SENSOR_PIDH: u8 = 0x0A;
const REG_SENSOR_COM7: u8 = 0x12;
const REG_DSP_RESET: u8 = 0xE0;
const REG_DSP_IMAGE_MODE: u8 = 0xDA;
const REG_DSP_ZMOW: u8 = 0x5A;
const REG_DSP_ZMOH: u8 = 0x5B;
const REG_DSP_ZMHH: u8 = 0x5C;

pub const BANK_DSP: u8 = 0x00;
pub const BANK_SENSOR: u8 = 0x01;

const COM7_SRST: u8 = 0x80;
const RESET_JPEG: u8 = 0x10;
const RESET_DVP: u8 = 0x04;
const IMAGE_MODE_JPEG_EN: u8 = 0x10;
const IMAGE_MODE_HREF_VSYNC: u8 = 0x02;

pub fn soft_reset_sequence() -> [RegWrite; 2] {
    [
        // BANK_SEL = SENSOR
        w(REG_BANK_SEL, BANK_SENSOR),
        w(REG_SENSOR_COM7, COM7_SRST),
    ]
}

pub fn jpeg_output_sequence() -> [RegWrite; 13] {
    [
        w(REG_BANK_SEL, BANK_DSP),
        w(REG_DSP_RESET, RESET_JPEG | RESET_DVP),
        w(REG_DSP_IMAGE_MODE, IMAGE_MODE_JPEG_EN | IMAGE_MODE_HREF_VSYNC),
        w(0xD7, 0x03),
        w(0xE1, 0x77),
        w(0xE5, 0x1F),
        w(0xD9, 0x10),
        w(0xDF, 0x80),
        w(0x33, 0x80),
        w(0x3C, 0x10),
        w(0xEB, 0x30),
        w(0xDD, 0x7F),
        w(REG_DSP_RESET, 0x00),
    ]
}

/// DSP の出力サイズ (ZMOW/ZMOH は 4 ピクセル単位)
pub fn output_size_sequence(resolution: Resolution) -> [RegWrite; 6] {
    let (width, height) = resolution.dimensions();
    let zmow = width >> 2;
    let zmoh = height >> 2;
    let zmhh = (((zmoh >> 8) & 0x01) << 2) as u8 | ((zmow >> 8) & 0x03) as u8;
    [
        w(REG_BANK_SEL, BANK_DSP),
        w(REG_DSP_RESET, RESET_DVP),
        w(REG_DSP_ZMOW, (zmow & 0xFF) as u8),
        w(REG_DSP_ZMOH, (zmoh & 0xFF) as u8),
        w(REG_DSP_ZMHH, zmhh),
        w(REG_DSP_RESET, 0x00),
    ]
}
