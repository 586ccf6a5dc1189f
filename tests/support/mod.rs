//! Writer for small synthetic catalogs

#![allow(dead_code)]

use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};

pub const SCALE: u32 = 12;
pub const IDIOM: u32 = 15;
pub const APPEARANCE: u32 = 7;
pub const IDENTIFIER: u32 = 17;
pub const ELEMENT: u32 = 1;

/// Attributes of every rendition key written by [`CatalogBuilder`]
const KEY_FORMAT: [u32; 5] = [SCALE, IDIOM, APPEARANCE, IDENTIFIER, ELEMENT];

pub const UNIVERSAL: u16 = 0;
pub const PHONE: u16 = 1;
pub const PAD: u16 = 2;

/// On-disk bytes of a four-character code, stored as a little-endian `u32`
fn tag(code: &[u8; 4]) -> [u8; 4] {
    let mut bytes = *code;
    bytes.reverse();
    bytes
}

fn be32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn le32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn le16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn fixed_str(out: &mut Vec<u8>, s: &str, len: usize) {
    let mut raw = s.as_bytes().to_vec();
    raw.resize(len, 0);
    out.extend_from_slice(&raw);
}

/// Block store writer
#[derive(Default)]
pub struct BomWriter {
    // Block 0 is the null block
    blocks: Vec<Vec<u8>>,
    vars: Vec<(String, u32)>,
}

impl BomWriter {
    pub fn new() -> Self {
        Self {
            blocks: vec![vec![]],
            vars: vec![],
        }
    }

    pub fn add(&mut self, data: Vec<u8>) -> u32 {
        self.blocks.push(data);
        (self.blocks.len() - 1) as u32
    }

    pub fn set(&mut self, id: u32, data: Vec<u8>) {
        self.blocks[id as usize] = data;
    }

    pub fn var(&mut self, name: &str, id: u32) {
        self.vars.push((name.to_owned(), id));
    }

    /// Write a tree of `(key block, value block)` entries, `leaf_capacity` per leaf
    pub fn tree(&mut self, entries: &[(u32, u32)], leaf_capacity: usize) -> u32 {
        let tree_id = self.add(vec![]);

        let chunks = entries.chunks(leaf_capacity.max(1)).collect::<Vec<_>>();
        let leaf_ids = chunks.iter().map(|_| self.add(vec![])).collect::<Vec<_>>();

        for (n, chunk) in chunks.iter().enumerate() {
            let forward = leaf_ids.get(n + 1).copied().unwrap_or(0);
            let backward = if n > 0 { leaf_ids[n - 1] } else { 0 };

            let mut node = vec![];
            node.extend_from_slice(&1u16.to_be_bytes());
            node.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
            be32(&mut node, forward);
            be32(&mut node, backward);
            for (key, value) in chunk.iter() {
                be32(&mut node, *value);
                be32(&mut node, *key);
            }
            self.set(leaf_ids[n], node);
        }

        let root = match leaf_ids.len() {
            0 => 0,
            1 => leaf_ids[0],
            _ => {
                let mut branch = vec![];
                branch.extend_from_slice(&0u16.to_be_bytes());
                branch.extend_from_slice(&(leaf_ids.len() as u16).to_be_bytes());
                be32(&mut branch, 0);
                be32(&mut branch, 0);
                for leaf in &leaf_ids {
                    be32(&mut branch, *leaf);
                    be32(&mut branch, 0);
                }
                self.add(branch)
            }
        };

        let mut tree = b"tree".to_vec();
        be32(&mut tree, 1);
        be32(&mut tree, root);
        be32(&mut tree, 4096);
        be32(&mut tree, entries.len() as u32);
        tree.push(0);
        self.set(tree_id, tree);

        tree_id
    }

    pub fn finish(self) -> Vec<u8> {
        const DATA_START: usize = 512;

        let mut data = vec![];
        let mut ranges = vec![];

        for block in &self.blocks {
            if block.is_empty() {
                ranges.push((0u32, 0u32));
                continue;
            }
            ranges.push(((DATA_START + data.len()) as u32, block.len() as u32));
            data.extend_from_slice(block);
        }

        let mut index = vec![];
        be32(&mut index, ranges.len() as u32);
        for (offset, len) in &ranges {
            be32(&mut index, *offset);
            be32(&mut index, *len);
        }

        let mut vars = vec![];
        be32(&mut vars, self.vars.len() as u32);
        for (name, id) in &self.vars {
            be32(&mut vars, *id);
            vars.push(name.len() as u8);
            vars.extend_from_slice(name.as_bytes());
        }

        let index_offset = DATA_START + data.len();
        let vars_offset = index_offset + index.len();

        let mut out = b"BOMStore".to_vec();
        be32(&mut out, 1);
        be32(&mut out, self.blocks.len() as u32);
        be32(&mut out, index_offset as u32);
        be32(&mut out, index.len() as u32);
        be32(&mut out, vars_offset as u32);
        be32(&mut out, vars.len() as u32);
        out.resize(DATA_START, 0);

        out.extend_from_slice(&data);
        out.extend_from_slice(&index);
        out.extend_from_slice(&vars);
        out
    }
}

/// Stored content of a rendition
#[derive(Clone)]
pub struct Payload {
    pixel_format: [u8; 4],
    width: u32,
    height: u32,
    layout: u16,
    body: Vec<u8>,
}

impl Payload {
    pub fn with_layout(mut self, layout: u16) -> Self {
        self.layout = layout;
        self
    }
}

/// Bitmap compression, with its on-disk identifier
#[derive(Clone, Copy)]
pub enum Packing {
    None = 0,
    RunLength = 1,
    Zlib = 2,
    Lzfse = 4,
}

fn celm(compression: u32, data: &[u8]) -> Vec<u8> {
    let mut out = tag(b"CELM").to_vec();
    le32(&mut out, 1);
    le32(&mut out, compression);
    le32(&mut out, data.len() as u32);
    out.extend_from_slice(data);
    out
}

fn rawd(data: &[u8]) -> Vec<u8> {
    let mut out = tag(b"RAWD").to_vec();
    le32(&mut out, 1);
    le32(&mut out, data.len() as u32);
    out.extend_from_slice(data);
    out
}

fn run_length(pixels: &[u8], bpp: usize) -> Vec<u8> {
    let mut out = vec![];
    let pixels = pixels.chunks_exact(bpp).collect::<Vec<_>>();
    let mut i = 0;

    while i < pixels.len() {
        let mut run = 1;
        while i + run < pixels.len() && run < 128 && pixels[i + run] == pixels[i] {
            run += 1;
        }

        if run > 1 {
            out.push((run + 0x7F) as u8);
        } else {
            out.push(0);
        }
        out.extend_from_slice(pixels[i]);
        i += run;
    }

    out
}

fn pack(packing: Packing, raw: &[u8], bpp: usize) -> Vec<u8> {
    let data = match packing {
        Packing::None => raw.to_vec(),
        Packing::RunLength => run_length(raw, bpp),
        Packing::Zlib => miniz_oxide::deflate::compress_to_vec_zlib(raw, 6),
        Packing::Lzfse => {
            let mut out = vec![];
            lzfse_rust::encode_bytes(raw, &mut out).unwrap();
            out
        }
    };

    celm(packing as u32, &data)
}

/// Opaque `ARGB` bitmap filled with one color
pub fn argb(width: u32, height: u32, rgb: [u8; 3], packing: Packing) -> Payload {
    let [r, g, b] = rgb;
    let raw = [b, g, r, 255].repeat((width * height) as usize);

    Payload {
        pixel_format: *b"ARGB",
        width,
        height,
        layout: 10,
        body: pack(packing, &raw, 4),
    }
}

/// `ARGB` bitmap with one premultiplied pixel per entry of `bgra`
pub fn argb_pixels(width: u32, height: u32, bgra: &[[u8; 4]]) -> Payload {
    Payload {
        pixel_format: *b"ARGB",
        width,
        height,
        layout: 10,
        body: pack(Packing::None, &bgra.concat(), 4),
    }
}

/// `GA8 ` bitmap filled with one premultiplied gray level
pub fn ga8(width: u32, height: u32, gray: u8, alpha: u8, packing: Packing) -> Payload {
    let raw = [gray, alpha].repeat((width * height) as usize);

    Payload {
        pixel_format: *b"GA8 ",
        width,
        height,
        layout: 10,
        body: pack(packing, &raw, 2),
    }
}

fn encode(image: RgbaImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut out = vec![];
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut out), format)
        .unwrap();
    out
}

/// Bytes of a PNG file filled with one color
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    encode(
        RgbaImage::from_pixel(width, height, Rgba(rgba)),
        ImageOutputFormat::Png,
    )
}

/// PNG file stored verbatim
pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Payload {
    Payload {
        pixel_format: *b"DATA",
        width,
        height,
        layout: 1000,
        body: rawd(&png_bytes(width, height, rgba)),
    }
}

/// Red rectangle as an SVG document
pub fn svg(width: u32, height: u32) -> Payload {
    let doc = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}"><rect width="{width}" height="{height}" fill="#ff0000"/></svg>"##
    );

    Payload {
        pixel_format: *b"SVG ",
        width: 0,
        height: 0,
        layout: 9,
        body: rawd(doc.as_bytes()),
    }
}

/// PDF document, which the reader does not rasterize
pub fn pdf() -> Payload {
    Payload {
        pixel_format: *b"PDF ",
        width: 0,
        height: 0,
        layout: 9,
        body: rawd(b"%PDF-1.4"),
    }
}

/// Bitmap whose declared length runs past the end of its data
pub fn truncated_argb(width: u32, height: u32) -> Payload {
    let mut body = celm(0, &vec![0; (width * height * 4) as usize]);
    body.truncate(body.len() / 2);

    Payload {
        pixel_format: *b"ARGB",
        width,
        height,
        layout: 10,
        body,
    }
}

/// Region of the rendition stored under `target`
pub fn link(target: &[u16], x: u32, y: u32, width: u32, height: u32) -> Payload {
    let mut body = tag(b"INLK").to_vec();
    for v in [1, x, y, width, height] {
        le32(&mut body, v);
    }
    le16(&mut body, 10);
    le32(&mut body, (target.len() * 2) as u32);
    for v in target {
        le16(&mut body, *v);
    }

    Payload {
        pixel_format: *b"ARGB",
        width,
        height,
        layout: 1003,
        body,
    }
}

fn csi(name: &str, scale: u32, payload: &Payload) -> Vec<u8> {
    let mut out = tag(b"CTSI").to_vec();
    le32(&mut out, 1);
    le32(&mut out, 0);
    le32(&mut out, payload.width);
    le32(&mut out, payload.height);
    le32(&mut out, scale * 100);
    out.extend_from_slice(&tag(&payload.pixel_format));
    le32(&mut out, 0);
    le32(&mut out, 0);
    le16(&mut out, payload.layout);
    le16(&mut out, 0);
    fixed_str(&mut out, name, 128);
    le32(&mut out, 0);
    le32(&mut out, 0);
    le32(&mut out, 0);
    le32(&mut out, payload.body.len() as u32);
    assert_eq!(out.len(), 184);

    out.extend_from_slice(&payload.body);
    out
}

/// `CARHEADER` block declaring `rendition_count` renditions
pub fn car_header(rendition_count: u32) -> Vec<u8> {
    let mut header = tag(b"CTAR").to_vec();
    for v in [975, 17, 0, rendition_count] {
        le32(&mut header, v);
    }
    fixed_str(&mut header, "@(#)PROGRAM:CoreUI", 128);
    fixed_str(&mut header, "carreader tests", 256);
    header.extend_from_slice(&[0; 16]);
    for v in [0, 2, 0, 2] {
        le32(&mut header, v);
    }
    header
}

/// `KEYFORMAT` block listing `attributes` in key order
pub fn key_format(attributes: &[u32]) -> Vec<u8> {
    let mut block = tag(b"kfmt").to_vec();
    le32(&mut block, 0);
    le32(&mut block, attributes.len() as u32);
    for attribute in attributes {
        le32(&mut block, *attribute);
    }
    block
}

/// Builds catalogs out of named renditions
pub struct CatalogBuilder {
    facets: Vec<String>,
    renditions: Vec<(Vec<u16>, Vec<u8>)>,
    leaf_capacity: usize,
    with_facets: bool,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            facets: vec![],
            renditions: vec![],
            leaf_capacity: 64,
            with_facets: true,
        }
    }

    /// Number of entries per tree leaf
    pub fn leaf_capacity(mut self, capacity: usize) -> Self {
        self.leaf_capacity = capacity;
        self
    }

    /// Leave out the `FACETKEYS` tree entirely
    pub fn without_facets(mut self) -> Self {
        self.with_facets = false;
        self
    }

    fn identifier(&mut self, name: &str) -> u16 {
        let pos = match self.facets.iter().position(|facet| facet == name) {
            Some(pos) => pos,
            None => {
                self.facets.push(name.to_owned());
                self.facets.len() - 1
            }
        };
        (pos + 1) as u16
    }

    fn next_key(&self, scale: u32, idiom: u16, identifier: u16) -> Vec<u16> {
        vec![
            scale as u16,
            idiom,
            0,
            identifier,
            (self.renditions.len() + 1) as u16,
        ]
    }

    /// Add a rendition of the named asset `name`; returns its key
    pub fn asset(&mut self, name: &str, scale: u32, idiom: u16, payload: Payload) -> Vec<u16> {
        let identifier = self.identifier(name);
        let key = self.next_key(scale, idiom, identifier);

        let file_name = format!("{name}.png");
        self.renditions
            .push((key.clone(), csi(&file_name, scale, &payload)));
        key
    }

    /// Add a rendition with no facet, named by its file name only
    pub fn theme_asset(&mut self, file_name: &str, scale: u32, payload: Payload) -> Vec<u16> {
        let key = self.next_key(scale, UNIVERSAL, 0);
        self.renditions
            .push((key.clone(), csi(file_name, scale, &payload)));
        key
    }

    /// Add a color rendition, which is not an image
    pub fn color(&mut self, name: &str) -> Vec<u16> {
        let identifier = self.identifier(name);
        let key = self.next_key(1, UNIVERSAL, identifier);

        let payload = Payload {
            pixel_format: [0; 4],
            width: 0,
            height: 0,
            layout: 1009,
            body: b"RLOC".to_vec(),
        };
        self.renditions.push((key.clone(), csi(name, 1, &payload)));
        key
    }

    pub fn build(&self) -> Vec<u8> {
        let mut bom = BomWriter::new();

        let header = bom.add(car_header(self.renditions.len() as u32));
        bom.var("CARHEADER", header);

        let key_format = bom.add(key_format(&KEY_FORMAT));
        bom.var("KEYFORMAT", key_format);

        if self.with_facets {
            let entries = self
                .facets
                .iter()
                .enumerate()
                .map(|(pos, name)| {
                    let mut value = vec![];
                    le16(&mut value, 0);
                    le16(&mut value, 0);
                    le16(&mut value, 1);
                    le16(&mut value, IDENTIFIER as u16);
                    le16(&mut value, (pos + 1) as u16);

                    (bom.add(name.as_bytes().to_vec()), bom.add(value))
                })
                .collect::<Vec<_>>();

            let tree = bom.tree(&entries, self.leaf_capacity);
            bom.var("FACETKEYS", tree);
        }

        let entries = self
            .renditions
            .iter()
            .map(|(key, csi)| {
                let raw_key = key.iter().flat_map(|v| v.to_le_bytes()).collect();
                (bom.add(raw_key), bom.add(csi.clone()))
            })
            .collect::<Vec<_>>();

        let tree = bom.tree(&entries, self.leaf_capacity);
        bom.var("RENDITIONS", tree);

        bom.finish()
    }

    /// Write the catalog to `dir/name`
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}
