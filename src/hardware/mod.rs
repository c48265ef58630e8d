/// ハードウェア制御モジュール
pub mod camera;
