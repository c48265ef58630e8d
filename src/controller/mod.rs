/// コントローラノード側のデバイス
pub mod remote_camera;

pub use remote_camera::RemoteCamera;
