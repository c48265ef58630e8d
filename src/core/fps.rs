//! フレームレートの範囲チェックとペーシング間隔の計算

/// 受け付ける最小 fps
pub const MIN_FPS: u8 = 1;
/// 受け付ける最大 fps
pub const MAX_FPS: u8 = 30;
/// 起動時のデフォルト fps
pub const DEFAULT_FPS: u8 = 5;

/// 範囲外の fps 指定
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fps が範囲外です ({min}-{max}): {0}", min = MIN_FPS, max = MAX_FPS)]
pub struct InvalidFps(pub i32);

/// `[MIN_FPS, MAX_FPS]` に収まる値だけを受け付けます。範囲外はクランプせず拒否します。
pub fn validate_fps(fps: i32) -> Result<u8, InvalidFps> {
    if (MIN_FPS as i32..=MAX_FPS as i32).contains(&fps) {
        Ok(fps as u8)
    } else {
        Err(InvalidFps(fps))
    }
}

/// フレーム周期 `round(1000 / fps)` ミリ秒
pub fn frame_interval_ms(fps: u8) -> u32 {
    let fps = u32::from(fps.max(MIN_FPS));
    (1000 + fps / 2) / fps
}
