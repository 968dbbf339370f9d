use clap::ValueEnum;

/// 一个相机机位，文件名以 `prefix` 开头的图片来自这个机位
#[derive(Debug, Clone, PartialEq)]
pub struct CameraMount {
    pub prefix: String,
    /// 相机相对载具的俯仰角偏移（度）
    pub offset: f64,
}

/// 相机支架配置，用于由载具俯仰角推算相机俯仰角
///
/// 匹配到遥测数据时：`载具俯仰角 + 机位偏移 + 世界坐标偏移`，
/// 未匹配时只有能从文件名确定机位的图片才有俯仰角。
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRig {
    pub mounts: Vec<CameraMount>,
    /// 文件名不属于任何机位时使用的偏移
    pub default_offset: f64,
    /// 支架坐标系到世界坐标系的固定偏移
    pub world_offset: f64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigPreset {
    /// 上中下三个相机头
    Wca2025,
    /// 单相机，`P` 开头的文件为垂直向下拍摄
    Legacy,
}

impl From<RigPreset> for CameraRig {
    fn from(preset: RigPreset) -> Self {
        let mount = |prefix: &str, offset: f64| CameraMount { prefix: prefix.to_string(), offset };
        match preset {
            RigPreset::Wca2025 => Self {
                mounts: vec![mount("camlower", 0.0), mount("cammid", -10.0), mount("camupper", -45.0)],
                default_offset: 0.0,
                world_offset: 90.0,
            },
            RigPreset::Legacy => {
                Self { mounts: vec![mount("P", 90.0)], default_offset: 30.0, world_offset: 0.0 }
            }
        }
    }
}

impl CameraRig {
    pub fn mount(&self, filename: &str) -> Option<&CameraMount> {
        self.mounts.iter().find(|m| filename.starts_with(&m.prefix))
    }

    /// 已匹配到遥测数据的图片的俯仰角，载具俯仰角缺失时按 0 处理
    pub fn matched_pitch(&self, filename: &str, vehicle_pitch: Option<f64>) -> f64 {
        let offset = self.mount(filename).map_or(self.default_offset, |m| m.offset);
        vehicle_pitch.unwrap_or(0.0) + offset + self.world_offset
    }

    /// 未匹配到遥测数据的图片的俯仰角
    pub fn fallback_pitch(&self, filename: &str) -> Option<f64> {
        self.mount(filename).map(|m| m.offset + self.world_offset)
    }
}
