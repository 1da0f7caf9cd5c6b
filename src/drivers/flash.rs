//! Application flash region control

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    EraseError,
    WriteError,
    TimeoutError,
}

/// One erase unit of the flash array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub index: usize,
    pub address: u32,
    pub size: u32,
}

/// Static sector map: a per-sector size table plus the half-open range of
/// sectors that hold the application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLayout {
    base: u32,
    sizes: &'static [u32],
    app_first: usize,
    app_end: usize,
}

impl SectorLayout {
    pub const fn new(base: u32, sizes: &'static [u32], app_first: usize, app_end: usize) -> Self {
        assert!(app_first <= app_end && app_end <= sizes.len());
        Self {
            base,
            sizes,
            app_first,
            app_end,
        }
    }

    pub fn sector(&self, index: usize) -> Option<Sector> {
        let size = *self.sizes.get(index)?;
        let offset: u32 = self.sizes[..index].iter().sum();
        Some(Sector {
            index,
            address: self.base + offset,
            size,
        })
    }

    pub fn app_sectors(&self) -> impl Iterator<Item = Sector> + '_ {
        (self.app_first..self.app_end).filter_map(move |index| self.sector(index))
    }

    /// First byte of the application image.
    pub fn app_base(&self) -> u32 {
        self.base + self.sizes[..self.app_first].iter().sum::<u32>()
    }

    /// Sum of the application sector sizes.
    pub fn app_size(&self) -> u32 {
        self.sizes[self.app_first..self.app_end].iter().sum()
    }
}

/// ATmega128: 128 KiB in 8 KiB sectors. The top sector is the 8 KiB boot
/// section this bootloader runs from.
pub const ATMEGA128_SECTOR_SIZES: [u32; 16] = [0x2000; 16];
pub const ATMEGA128_LAYOUT: SectorLayout = SectorLayout::new(0x0000, &ATMEGA128_SECTOR_SIZES, 0, 15);

/// Raw flash controller access. Implemented by the target's self-programming
/// driver and by test doubles.
pub trait FlashProgrammer {
    fn unlock(&mut self);

    fn lock(&mut self);

    fn erase_sector(&mut self, sector: &Sector) -> Result<(), FlashError>;

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    fn dual_bank_enabled(&self) -> bool;
}

/// What the update state machine needs from flash.
pub trait FlashControl {
    /// Erases every application sector. Irreversible.
    fn erase_main_app(&mut self) -> Result<(), FlashError>;

    fn available_size(&self) -> u32;

    /// No bounds checking here; callers keep writes inside the erased region.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    fn is_dual_bank(&self) -> bool;

    fn app_base(&self) -> u32;
}

impl<F: FlashControl + ?Sized> FlashControl for &mut F {
    fn erase_main_app(&mut self) -> Result<(), FlashError> {
        (**self).erase_main_app()
    }

    fn available_size(&self) -> u32 {
        (**self).available_size()
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn is_dual_bank(&self) -> bool {
        (**self).is_dual_bank()
    }

    fn app_base(&self) -> u32 {
        (**self).app_base()
    }
}

pub struct AppFlash<P> {
    programmer: P,
    layout: SectorLayout,
}

impl<P: FlashProgrammer> AppFlash<P> {
    pub fn new(programmer: P, layout: SectorLayout) -> Self {
        Self { programmer, layout }
    }

    pub fn layout(&self) -> &SectorLayout {
        &self.layout
    }

    pub fn programmer(&self) -> &P {
        &self.programmer
    }

    pub fn release(self) -> P {
        self.programmer
    }
}

impl<P: FlashProgrammer> FlashControl for AppFlash<P> {
    fn erase_main_app(&mut self) -> Result<(), FlashError> {
        self.programmer.unlock();
        let mut result = Ok(());
        for sector in self.layout.app_sectors() {
            result = self.programmer.erase_sector(&sector);
            if result.is_err() {
                break;
            }
        }
        self.programmer.lock();
        result
    }

    fn available_size(&self) -> u32 {
        self.layout.app_size()
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.programmer.unlock();
        let result = self.programmer.program(address, data);
        self.programmer.lock();
        result
    }

    fn is_dual_bank(&self) -> bool {
        self.programmer.dual_bank_enabled()
    }

    fn app_base(&self) -> u32 {
        self.layout.app_base()
    }
}
