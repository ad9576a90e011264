// 该文件是 Tanshang （探伤） 项目的一部分。
// src/classes.rs - 缺陷类别表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Tanshang 项目贡献者

/// 一个缺陷类别的显示信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefectClass {
  pub name: &'static str,
  /// 边框与标签底色
  pub box_color: [u8; 3],
  /// 标签文字颜色
  pub text_color: [u8; 3],
}

/// 训练模型固定的六类钢材表面缺陷：
/// 裂纹、夹杂、斑块、麻点、划痕、氧化铁皮压入
pub const DEFECT_CLASSES: [DefectClass; 6] = [
  // 0: 裂纹
  DefectClass {
    name: "cr",
    box_color: [255, 0, 0],
    text_color: [255, 255, 255],
  },
  // 1: 夹杂
  DefectClass {
    name: "ic",
    box_color: [255, 165, 0],
    text_color: [255, 255, 255],
  },
  // 2: 斑块
  DefectClass {
    name: "ps",
    box_color: [255, 255, 0],
    text_color: [0, 0, 0],
  },
  // 3: 麻点
  DefectClass {
    name: "rs",
    box_color: [0, 255, 0],
    text_color: [0, 0, 0],
  },
  // 4: 划痕
  DefectClass {
    name: "sc",
    box_color: [0, 0, 255],
    text_color: [255, 255, 255],
  },
  // 5: 氧化铁皮压入
  DefectClass {
    name: "pc",
    box_color: [128, 0, 128],
    text_color: [255, 255, 255],
  },
];

/// 模型不匹配或输出损坏时的兜底类别
pub const UNKNOWN_CLASS: DefectClass = DefectClass {
  name: "unknown",
  box_color: [128, 128, 128],
  text_color: [255, 255, 255],
};

/// 按类别 id 查表，越界 id 返回兜底类别而不是报错
pub fn class_info(class_id: u32) -> &'static DefectClass {
  DEFECT_CLASSES
    .get(class_id as usize)
    .unwrap_or(&UNKNOWN_CLASS)
}
